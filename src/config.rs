use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::analysis::ExpectedDomain;
use crate::framing::{FramingProfile, ASM};
use crate::ledger::RolloverPolicy;
use crate::Result;

/// Settings for a [Processor](crate::pipeline::Processor).
///
/// Every field has a default, so a JSON document only needs the fields that differ:
/// ```
/// use downlink::config::Config;
///
/// let config = Config::from_json_str(r#"{"profile": "direct", "report_dir": "/data/report"}"#)
///     .unwrap();
/// assert_eq!(config.framing().unwrap().name, "direct");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct Config {
    /// Name of a built-in framing profile used when `custom_profile` is not set.
    #[builder(default = "relayed".to_string(), setter(into))]
    pub profile: String,
    /// Explicit header layout, overriding `profile`.
    #[builder(default, setter(strip_option))]
    pub custom_profile: Option<FramingProfile>,
    #[builder(default = ASM.to_vec())]
    pub sync_marker: Vec<u8>,
    #[builder(default)]
    pub domain: ExpectedDomain,
    #[builder(default)]
    pub rollover: RolloverPolicy,
    #[builder(default = PathBuf::from("report"), setter(into))]
    pub report_dir: PathBuf,
    /// Where complete products are written.
    #[builder(default = PathBuf::from("optical"), setter(into))]
    pub product_dir: PathBuf,
    /// Where best-effort products awaiting a retransmission are written.
    #[builder(default = PathBuf::from("tmp"), setter(into))]
    pub incomplete_dir: PathBuf,
    /// Worker threads used to analyze a batch of captures, 0 to let rayon decide.
    #[builder(default)]
    pub threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    /// # Errors
    /// [Error::Json](crate::Error::Json) if the document is invalid, or
    /// [Error::Config](crate::Error::Config) if it names an unknown or invalid profile.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// See [Config::from_json_str]; also if the file cannot be read.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Resolve the framing profile.
    ///
    /// # Errors
    /// [Error::Config](crate::Error::Config) if `profile` does not name a built-in
    /// profile and there is no `custom_profile`.
    pub fn framing(&self) -> Result<FramingProfile> {
        match &self.custom_profile {
            Some(profile) => Ok(profile.clone()),
            None => FramingProfile::by_name(&self.profile),
        }
    }

    /// # Errors
    /// [Error::Config](crate::Error::Config) describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.sync_marker.is_empty() {
            return Err(crate::Error::Config("sync marker is empty".to_string()));
        }
        self.framing()?.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.framing().unwrap(), FramingProfile::relayed());
        assert_eq!(config.domain, ExpectedDomain::default());
        assert_eq!(config.rollover, RolloverPolicy::Size { max_bytes: 10_000 });
        assert_eq!(config.sync_marker, ASM);
        assert_eq!(config.product_dir, PathBuf::from("optical"));
        config.validate().unwrap();
    }

    #[test]
    fn from_json() {
        let config = Config::from_json_str(
            r#"{
                "profile": "direct",
                "domain": {"image_packets": 100, "housekeeping_ceiling": 50},
                "rollover": {"missing_budget": {"max_missing": 8310}},
                "incomplete_dir": "/data/tmp"
            }"#,
        )
        .unwrap();

        assert_eq!(config.framing().unwrap(), FramingProfile::direct());
        assert_eq!(config.domain.image_packets, 100);
        assert_eq!(
            config.rollover,
            RolloverPolicy::MissingBudget { max_missing: 8310 }
        );
        assert_eq!(config.incomplete_dir, PathBuf::from("/data/tmp"));
        assert_eq!(config.report_dir, PathBuf::from("report"));
    }

    #[test]
    fn custom_profile_overrides_name() {
        let custom = FramingProfile::builder()
            .name("bench".to_string())
            .kind_offset(0)
            .sequence_offset(2)
            .quality_offset(5)
            .payload_offset(8)
            .build();
        let config = Config::builder().custom_profile(custom.clone()).build();
        assert_eq!(config.framing().unwrap(), custom);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = Config::builder().profile("nope").build();
        assert!(matches!(config.framing(), Err(crate::Error::Config(_))));
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_config() {
        assert!(Config::from_json_str(r#"{"profile": "nope"}"#).is_err());
        assert!(Config::from_json_str(r#"{"sync_marker": []}"#).is_err());
        assert!(Config::from_json_str("{").is_err());
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"profile": "archive"}"#).unwrap();
        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.framing().unwrap(), FramingProfile::archive());
    }
}
