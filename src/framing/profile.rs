use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{Error, Result};

/// Byte offsets locating the packet header fields within a frame.
///
/// All offsets are relative to the first byte after the sync marker. Profiles are
/// plain data so additional link paths can be described in configuration rather than
/// code. Changing the offsets of an existing profile requires bumping its `version`.
///
/// # Example
/// ```
/// use downlink::framing::FramingProfile;
///
/// let profile = FramingProfile::builder()
///     .name("bench".to_string())
///     .kind_offset(4)
///     .sequence_offset(6)
///     .quality_offset(0)
///     .payload_offset(12)
///     .build();
/// assert_eq!(profile.header_len(), 9);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct FramingProfile {
    pub name: String,
    #[builder(default = 1)]
    #[serde(default = "default_version")]
    pub version: u16,
    /// Offset of the 2-byte kind discriminant.
    pub kind_offset: usize,
    /// Offset of the 3-byte big-endian sequence counter.
    pub sequence_offset: usize,
    /// Offset of the 1-byte data quality flag. Frames are always good when `None`.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub quality_offset: Option<usize>,
    /// Offset of the first payload byte.
    pub payload_offset: usize,
    /// Number of bytes at the end of a frame that are not payload.
    #[builder(default)]
    #[serde(default)]
    pub trailer_len: usize,
    #[builder(default = FramingProfile::IMAGE_ID)]
    #[serde(default = "default_image_id")]
    pub image_id: [u8; 2],
    #[builder(default = FramingProfile::HOUSEKEEPING_ID)]
    #[serde(default = "default_housekeeping_id")]
    pub housekeeping_id: [u8; 2],
}

fn default_version() -> u16 {
    1
}

fn default_image_id() -> [u8; 2] {
    FramingProfile::IMAGE_ID
}

fn default_housekeeping_id() -> [u8; 2] {
    FramingProfile::HOUSEKEEPING_ID
}

impl FramingProfile {
    /// Kind discriminant for image packets.
    pub const IMAGE_ID: [u8; 2] = [0x55, 0x40];
    /// Kind discriminant for housekeeping packets.
    pub const HOUSEKEEPING_ID: [u8; 2] = [0x40, 0x3f];
    /// Transfer frame trailer length used by the satellite's link.
    pub const TRAILER_LEN: usize = 160;
    /// Length of the ground equipment framing preceding relayed frames.
    pub const RELAY_PREFIX_LEN: usize = 28;

    /// Frames starting at the satellite's own transfer frame header. No quality flag
    /// is carried, byte 5 is the frame's signalling field.
    #[must_use]
    pub fn direct() -> Self {
        FramingProfile {
            name: "direct".to_string(),
            version: 2,
            kind_offset: 0,
            sequence_offset: 2,
            quality_offset: None,
            payload_offset: 28,
            trailer_len: Self::TRAILER_LEN,
            image_id: Self::IMAGE_ID,
            housekeeping_id: Self::HOUSEKEEPING_ID,
        }
    }

    /// Frames prefixed by ground equipment framing, which carries the quality flag.
    #[must_use]
    pub fn relayed() -> Self {
        FramingProfile {
            name: "relayed".to_string(),
            version: 1,
            kind_offset: Self::RELAY_PREFIX_LEN,
            sequence_offset: Self::RELAY_PREFIX_LEN + 2,
            quality_offset: Some(1),
            payload_offset: Self::RELAY_PREFIX_LEN + 28,
            trailer_len: Self::TRAILER_LEN,
            image_id: Self::IMAGE_ID,
            housekeeping_id: Self::HOUSEKEEPING_ID,
        }
    }

    /// Compact framing used to store incomplete products: kind, sequence, then the
    /// payload with no trailer. Only good packets are stored, so there is no quality
    /// flag. This is the layout the ground scripts used for their `tmp_` files.
    #[must_use]
    pub fn archive() -> Self {
        FramingProfile {
            name: "archive".to_string(),
            version: 2,
            kind_offset: 0,
            sequence_offset: 2,
            quality_offset: None,
            payload_offset: 5,
            trailer_len: 0,
            image_id: Self::IMAGE_ID,
            housekeeping_id: Self::HOUSEKEEPING_ID,
        }
    }

    /// Look up one of the built-in profiles by name.
    ///
    /// # Errors
    /// [Error::Config] if there is no such profile.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "direct" => Ok(Self::direct()),
            "relayed" => Ok(Self::relayed()),
            "archive" => Ok(Self::archive()),
            _ => Err(Error::Config(format!("unknown framing profile {name:?}"))),
        }
    }

    /// Minimum frame length required to read all header fields.
    #[must_use]
    pub fn header_len(&self) -> usize {
        (self.kind_offset + 2)
            .max(self.sequence_offset + 3)
            .max(self.quality_offset.map_or(0, |q| q + 1))
    }

    /// Byte range of the payload within a frame of `frame_len` bytes, or `None` if the
    /// frame is too short to hold any payload.
    #[must_use]
    pub fn payload_bounds(&self, frame_len: usize) -> Option<(usize, usize)> {
        let end = frame_len.checked_sub(self.trailer_len)?;
        if end <= self.payload_offset {
            return None;
        }
        Some((self.payload_offset, end))
    }

    /// Check that the header fields do not overlap each other or the payload.
    ///
    /// # Errors
    /// [Error::Config] describing the first overlap found.
    pub fn validate(&self) -> Result<()> {
        let mut fields = vec![
            ("kind", self.kind_offset, 2),
            ("sequence", self.sequence_offset, 3),
        ];
        if let Some(quality) = self.quality_offset {
            fields.push(("quality", quality, 1));
        }
        for (i, &(a, a_off, a_len)) in fields.iter().enumerate() {
            if a_off + a_len > self.payload_offset {
                return Err(Error::Config(format!(
                    "profile {}: {a} field overlaps the payload",
                    self.name
                )));
            }
            for &(b, b_off, b_len) in &fields[i + 1..] {
                if a_off < b_off + b_len && b_off < a_off + a_len {
                    return Err(Error::Config(format!(
                        "profile {}: {a} and {b} fields overlap",
                        self.name
                    )));
                }
            }
        }
        if self.image_id == self.housekeeping_id {
            return Err(Error::Config(format!(
                "profile {}: image and housekeeping ids are identical",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(FramingProfile::direct(), 5 ; "direct")]
    #[test_case(FramingProfile::relayed(), 33 ; "relayed")]
    #[test_case(FramingProfile::archive(), 5 ; "archive")]
    fn builtin_profiles_are_valid(profile: FramingProfile, header_len: usize) {
        profile.validate().unwrap();
        assert_eq!(profile.header_len(), header_len);
        assert_eq!(FramingProfile::by_name(&profile.name).unwrap(), profile);
    }

    #[test]
    fn relayed_is_direct_shifted_by_prefix() {
        let direct = FramingProfile::direct();
        let relayed = FramingProfile::relayed();
        let shift = FramingProfile::RELAY_PREFIX_LEN;

        assert_eq!(relayed.kind_offset, direct.kind_offset + shift);
        assert_eq!(relayed.sequence_offset, direct.sequence_offset + shift);
        assert_eq!(relayed.payload_offset, direct.payload_offset + shift);
        assert_eq!(relayed.trailer_len, direct.trailer_len);
    }

    #[test]
    fn payload_bounds() {
        let profile = FramingProfile::relayed();

        assert_eq!(profile.payload_bounds(56 + 160 + 10), Some((56, 66)));
        assert_eq!(profile.payload_bounds(56 + 160), None);
        assert_eq!(profile.payload_bounds(40), None);
    }

    #[test]
    fn overlapping_fields_are_invalid() {
        let profile = FramingProfile::builder()
            .name("bad".to_string())
            .kind_offset(0)
            .sequence_offset(1)
            .quality_offset(5)
            .payload_offset(6)
            .build();

        assert!(matches!(profile.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn unknown_profile_name() {
        assert!(FramingProfile::by_name("uhf").is_err());
    }

    #[test]
    fn deserialize_with_defaults() {
        let profile: FramingProfile = serde_json::from_str(
            r#"{"name": "direct", "version": 2, "kind_offset": 0, "sequence_offset": 2,
                "payload_offset": 28, "trailer_len": 160}"#,
        )
        .unwrap();
        assert_eq!(profile, FramingProfile::direct());

        let profile: FramingProfile = serde_json::from_str(
            r#"{"name": "uhf", "kind_offset": 0, "sequence_offset": 2,
                "quality_offset": 5, "payload_offset": 8}"#,
        )
        .unwrap();
        assert_eq!(profile.quality_offset, Some(5));
        assert_eq!(profile.version, 1);
        assert_eq!(profile.header_len(), 6);
    }

    #[test]
    fn quality_field_only_checked_when_present() {
        let profile = FramingProfile::builder()
            .name("packed".to_string())
            .kind_offset(0)
            .sequence_offset(2)
            .payload_offset(5)
            .build();
        profile.validate().unwrap();
        assert_eq!(profile.header_len(), 5);

        let profile = FramingProfile::builder()
            .name("packed".to_string())
            .kind_offset(0)
            .sequence_offset(2)
            .quality_offset(5)
            .payload_offset(5)
            .build();
        assert!(profile.validate().is_err());
    }
}
