//! The fixed catalogue of operations driven during the Operate phase

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named automation step.
///
/// Variants are declared in execution order, so `Ord` and `BTreeMap` keys
/// follow the operate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    #[serde(rename = "upload_apk")]
    UploadApk,
    #[serde(rename = "install_apk")]
    InstallApk,
    #[serde(rename = "launch_apk")]
    LaunchApk,
    #[serde(rename = "screenshot_1")]
    FirstScreenshot,
    #[serde(rename = "tap_random_1")]
    FirstRandomTap,
    #[serde(rename = "get_page_xml")]
    PageXml,
    #[serde(rename = "get_device_info")]
    DeviceInfo,
    #[serde(rename = "open_browser")]
    OpenBrowser,
    #[serde(rename = "tap_random_2")]
    SecondRandomTap,
    #[serde(rename = "screenshot_2")]
    SecondScreenshot,
    #[serde(rename = "get_logs")]
    DeviceLogs,
}

impl OperationKind {
    /// Every operation, in the order a unit runs them.
    pub const SEQUENCE: [OperationKind; 11] = [
        OperationKind::UploadApk,
        OperationKind::InstallApk,
        OperationKind::LaunchApk,
        OperationKind::FirstScreenshot,
        OperationKind::FirstRandomTap,
        OperationKind::PageXml,
        OperationKind::DeviceInfo,
        OperationKind::OpenBrowser,
        OperationKind::SecondRandomTap,
        OperationKind::SecondScreenshot,
        OperationKind::DeviceLogs,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            OperationKind::UploadApk => "upload_apk",
            OperationKind::InstallApk => "install_apk",
            OperationKind::LaunchApk => "launch_apk",
            OperationKind::FirstScreenshot => "screenshot_1",
            OperationKind::FirstRandomTap => "tap_random_1",
            OperationKind::PageXml => "get_page_xml",
            OperationKind::DeviceInfo => "get_device_info",
            OperationKind::OpenBrowser => "open_browser",
            OperationKind::SecondRandomTap => "tap_random_2",
            OperationKind::SecondScreenshot => "screenshot_2",
            OperationKind::DeviceLogs => "get_logs",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OperationKind::UploadApk => "Upload APK",
            OperationKind::InstallApk => "Install APK",
            OperationKind::LaunchApk => "Launch APK",
            OperationKind::FirstScreenshot => "Screenshot (1)",
            OperationKind::FirstRandomTap => "Tap Random (1)",
            OperationKind::PageXml => "Get Page XML",
            OperationKind::DeviceInfo => "Get Device Info",
            OperationKind::OpenBrowser => "Open Browser",
            OperationKind::SecondRandomTap => "Tap Random (2)",
            OperationKind::SecondScreenshot => "Screenshot (2)",
            OperationKind::DeviceLogs => "Get Logs",
        }
    }

    /// 1-based position in [`OperationKind::SEQUENCE`]
    pub fn position(&self) -> usize {
        *self as usize + 1
    }

    /// Metric label, e.g. `"4. Screenshot (1)"`
    pub fn metric_name(&self) -> String {
        format!("{}. {}", self.position(), self.display_name())
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_sequence_order_matches_ord() {
        let mut sorted = OperationKind::SEQUENCE.to_vec();
        sorted.sort();
        assert_eq!(sorted, OperationKind::SEQUENCE.to_vec());
        assert_eq!(OperationKind::UploadApk.position(), 1);
        assert_eq!(OperationKind::DeviceLogs.position(), 11);
    }

    #[test]
    fn test_serde_key_matches_key() {
        for kind in OperationKind::SEQUENCE {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.key()));
        }
    }

    #[test]
    fn test_map_keys_serialize_as_strings() {
        let mut map = BTreeMap::new();
        map.insert(OperationKind::FirstScreenshot, 1);
        map.insert(OperationKind::UploadApk, 2);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"upload_apk":2,"screenshot_1":1}"#);

        let back: BTreeMap<OperationKind, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(OperationKind::FirstScreenshot.metric_name(), "4. Screenshot (1)");
    }
}
