//! App profile installed and exercised on every device

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable, Violations};
use serde::{Deserialize, Serialize};

/// Directory where pre-mounted assets appear on the device
pub const MOUNT_PATH_PREFIX: &str = "/data/local/tmp/mnt";

/// App configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Human-readable app name
    pub name: String,

    /// Android package name
    pub package: String,

    /// Launch activity, relative to the package
    pub activity: String,

    /// Local APK pushed in upload mode
    pub apk_path: String,

    /// Device path the APK is uploaded to
    pub remote_path: String,

    /// Device path of the pre-mounted APK
    pub mounted_path: String,

    /// Runtime permissions granted after install
    pub permissions: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Meituan".to_string(),
            package: "com.sankuai.meituan".to_string(),
            activity: ".activity.MainActivity".to_string(),
            apk_path: "apk/meituan.apk".to_string(),
            remote_path: "/data/local/tmp/meituan.apk".to_string(),
            mounted_path: format!("{}/meituan.apk", MOUNT_PATH_PREFIX),
            permissions: [
                "android.permission.ACCESS_FINE_LOCATION",
                "android.permission.ACCESS_COARSE_LOCATION",
                "android.permission.READ_EXTERNAL_STORAGE",
                "android.permission.CAMERA",
                "android.permission.RECORD_AUDIO",
                "android.permission.READ_CONTACTS",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

impl AppConfig {
    /// Device path the installer reads from
    pub fn install_path(&self, pre_mounted: bool) -> &str {
        if pre_mounted {
            &self.mounted_path
        } else {
            &self.remote_path
        }
    }
}

impl Validatable for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        let domain = self.domain_name();
        let mut violations = Violations::new();

        violations.check(validate_required_string(&self.package, "package", domain));
        violations.check(validate_required_string(&self.remote_path, "remote_path", domain));
        violations.check(validate_required_string(&self.mounted_path, "mounted_path", domain));
        for permission in &self.permissions {
            if permission.trim().is_empty() {
                violations.push(format!("{}: permissions cannot contain empty entries", domain));
                break;
            }
        }

        violations.into_result()
    }

    fn domain_name(&self) -> &'static str {
        "app"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_path_follows_mode() {
        let app = AppConfig::default();
        assert_eq!(app.install_path(false), "/data/local/tmp/meituan.apk");
        assert!(app.install_path(true).starts_with(MOUNT_PATH_PREFIX));
    }
}
