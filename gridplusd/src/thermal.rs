//! Thermal source adapter
//!
//! Enumerates temperature sensors from the kernel's hwmon class and exposes
//! them as named readings in degrees Celsius. A sensor is named from its
//! `temp*_label` file when the driver provides one, else from the chip name
//! and channel number.

use gridplus_core::{GridError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const HWMON_CLASS: &str = "/sys/class/hwmon";

/// One temperature channel of an hwmon chip
#[derive(Debug, Clone)]
pub struct TempSensor {
    name: String,
    input: PathBuf,
}

impl TempSensor {
    /// Human-readable sensor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current temperature in degrees Celsius.
    ///
    /// hwmon reports millidegrees as ASCII decimal.
    pub async fn read_celsius(&self) -> Result<f64> {
        let raw = fs::read_to_string(&self.input).await.map_err(|e| {
            GridError::Sensor(format!("failed to read {}: {e}", self.input.display()))
        })?;

        let millidegrees: i64 = raw.trim().parse().map_err(|e| {
            GridError::Parse(format!(
                "bad temperature value {:?} in {}: {e}",
                raw.trim(),
                self.input.display()
            ))
        })?;

        Ok(millidegrees as f64 / 1000.0)
    }
}

/// Read-only directory of the machine's temperature sensors
#[derive(Debug, Default)]
pub struct ThermalMonitor {
    sensors: Vec<TempSensor>,
}

impl ThermalMonitor {
    /// Enumerate every temperature channel under `/sys/class/hwmon`.
    pub async fn enumerate() -> Result<Self> {
        Self::enumerate_from(Path::new(HWMON_CLASS)).await
    }

    /// Enumerate from an alternate hwmon root (used by tests).
    pub async fn enumerate_from(base: &Path) -> Result<Self> {
        let mut sensors = Vec::new();

        let mut chips = fs::read_dir(base).await.map_err(|e| {
            GridError::Sensor(format!("cannot enumerate {}: {e}", base.display()))
        })?;

        while let Some(chip_entry) = chips
            .next_entry()
            .await
            .map_err(|e| GridError::Sensor(format!("cannot enumerate {}: {e}", base.display())))?
        {
            let chip_dir = chip_entry.path();

            let chip_name = match fs::read_to_string(chip_dir.join("name")).await {
                Ok(name) => name.trim().to_string(),
                Err(_) => chip_entry.file_name().to_string_lossy().into_owned(),
            };

            let mut files = match fs::read_dir(&chip_dir).await {
                Ok(files) => files,
                // not a chip directory; skip
                Err(_) => continue,
            };

            while let Some(file) = files.next_entry().await.map_err(|e| {
                GridError::Sensor(format!("cannot enumerate {}: {e}", chip_dir.display()))
            })? {
                let file_name = file.file_name().to_string_lossy().into_owned();
                let Some(channel) = file_name
                    .strip_prefix("temp")
                    .and_then(|rest| rest.strip_suffix("_input"))
                else {
                    continue;
                };

                let name = match fs::read_to_string(chip_dir.join(format!("temp{channel}_label")))
                    .await
                {
                    Ok(label) => label.trim().to_string(),
                    Err(_) => format!("{chip_name}-temp{channel}"),
                };

                sensors.push(TempSensor {
                    name,
                    input: file.path(),
                });
            }
        }

        // directory iteration order is arbitrary; keep lookups deterministic
        sensors.sort_by(|a, b| a.name.cmp(&b.name));

        debug!("Enumerated {} temperature sensors", sensors.len());
        Ok(Self { sensors })
    }

    /// Look a sensor up by its exact name.
    pub fn find(&self, name: &str) -> Option<&TempSensor> {
        self.sensors.iter().find(|sensor| sensor.name == name)
    }

    /// All enumerated sensors
    pub fn sensors(&self) -> &[TempSensor] {
        &self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a fake hwmon chip directory with the given channels
    async fn fake_chip(root: &Path, dir: &str, name: &str, channels: &[(u32, Option<&str>, i64)]) {
        let chip = root.join(dir);
        fs::create_dir_all(&chip).await.unwrap();
        fs::write(chip.join("name"), format!("{name}\n")).await.unwrap();

        for (channel, label, millidegrees) in channels {
            fs::write(
                chip.join(format!("temp{channel}_input")),
                format!("{millidegrees}\n"),
            )
            .await
            .unwrap();
            if let Some(label) = label {
                fs::write(chip.join(format!("temp{channel}_label")), format!("{label}\n"))
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn enumerates_labeled_and_unlabeled_channels() {
        let root = TempDir::new().unwrap();
        fake_chip(
            root.path(),
            "hwmon0",
            "acpitz",
            &[(1, Some("CPU Temperature"), 42_500)],
        )
        .await;
        fake_chip(root.path(), "hwmon1", "nvme", &[(1, None, 35_000)]).await;

        let monitor = ThermalMonitor::enumerate_from(root.path()).await.unwrap();

        assert_eq!(monitor.len(), 2);
        assert!(monitor.find("CPU Temperature").is_some());
        assert!(monitor.find("nvme-temp1").is_some());
        assert!(monitor.find("missing").is_none());
    }

    #[tokio::test]
    async fn reads_millidegrees_as_celsius() {
        let root = TempDir::new().unwrap();
        fake_chip(
            root.path(),
            "hwmon0",
            "k10temp",
            &[(1, Some("Tctl"), 54_125)],
        )
        .await;

        let monitor = ThermalMonitor::enumerate_from(root.path()).await.unwrap();
        let sensor = monitor.find("Tctl").unwrap();

        assert_eq!(sensor.read_celsius().await.unwrap(), 54.125);
    }

    #[tokio::test]
    async fn negative_temperatures_are_preserved() {
        let root = TempDir::new().unwrap();
        fake_chip(root.path(), "hwmon0", "outside", &[(1, None, -5_250)]).await;

        let monitor = ThermalMonitor::enumerate_from(root.path()).await.unwrap();
        let sensor = monitor.find("outside-temp1").unwrap();

        assert_eq!(sensor.read_celsius().await.unwrap(), -5.25);
    }

    #[tokio::test]
    async fn malformed_input_is_a_parse_error() {
        let root = TempDir::new().unwrap();
        let chip = root.path().join("hwmon0");
        fs::create_dir_all(&chip).await.unwrap();
        fs::write(chip.join("name"), "broken\n").await.unwrap();
        fs::write(chip.join("temp1_input"), "garbage\n").await.unwrap();

        let monitor = ThermalMonitor::enumerate_from(root.path()).await.unwrap();
        let sensor = monitor.find("broken-temp1").unwrap();

        assert!(matches!(
            sensor.read_celsius().await,
            Err(GridError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn missing_root_is_a_sensor_error() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("nope");

        assert!(matches!(
            ThermalMonitor::enumerate_from(&missing).await,
            Err(GridError::Sensor(_))
        ));
    }
}
