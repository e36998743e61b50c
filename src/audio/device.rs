use cpal::{Device, Host, SampleFormat, SupportedStreamConfig};
use cpal::traits::{DeviceTrait, HostTrait};
use std::collections::BTreeMap;
use crate::error::AudioError;

/// What the `devices` command reports for one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
    pub is_default: bool,
}

impl DeviceSummary {
    pub fn describe(&self) -> String {
        format!(
            "{}{} ({} Hz, {} ch, {})",
            if self.is_default { "* " } else { "  " },
            self.name,
            self.sample_rate,
            self.channels,
            self.sample_format
        )
    }
}

/// Manages audio device enumeration and selection
pub struct DeviceManager {
    host: Host,
    devices: BTreeMap<String, Device>,
    current_device: Option<Device>,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        let mut manager = DeviceManager {
            host: cpal::default_host(),
            devices: BTreeMap::new(),
            current_device: None,
        };

        manager.refresh_devices()?;
        Ok(manager)
    }

    /// Refresh the list of available output devices
    pub fn refresh_devices(&mut self) -> Result<(), AudioError> {
        self.devices.clear();

        let devices = self.host.output_devices()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to enumerate devices: {}", e)))?;

        for device in devices {
            match device.name() {
                Ok(name) => {
                    self.devices.insert(name, device);
                }
                Err(e) => log::debug!("Skipping output device without a name: {}", e),
            }
        }

        Ok(())
    }

    pub fn list_devices(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Describe every output device with its default stream configuration
    pub fn summaries(&self) -> Vec<DeviceSummary> {
        let default_name = self.host
            .default_output_device()
            .and_then(|d| d.name().ok());

        self.devices
            .iter()
            .filter_map(|(name, device)| {
                let config = device.default_output_config().ok()?;
                Some(DeviceSummary {
                    name: name.clone(),
                    sample_rate: config.sample_rate().0,
                    channels: config.channels(),
                    sample_format: format!("{:?}", config.sample_format()),
                    is_default: default_name.as_deref() == Some(name.as_str()),
                })
            })
            .collect()
    }

    /// Select a device by name with fallback to the default device
    pub fn select_device_with_fallback(&mut self, device_name: Option<&str>) -> Result<(), AudioError> {
        match device_name {
            Some(name) => {
                if let Some(device) = self.devices.get(name).cloned() {
                    self.current_device = Some(device);
                    Ok(())
                } else {
                    log::warn!("Output device '{}' not found, using default device", name);
                    self.select_default_device()
                        .map_err(|_| AudioError::DeviceNotFound {
                            device: name.to_string()
                        })
                }
            }
            None => self.select_default_device(),
        }
    }

    pub fn select_default_device(&mut self) -> Result<(), AudioError> {
        let default_device = self.host.default_output_device()
            .ok_or_else(|| AudioError::InitializationFailed("No default output device available".to_string()))?;

        self.current_device = Some(default_device);
        Ok(())
    }

    pub fn current_device(&self) -> Option<&Device> {
        self.current_device.as_ref()
    }

    pub fn current_device_name(&self) -> Option<String> {
        self.current_device.as_ref().and_then(|d| d.name().ok())
    }

    /// Default stream configuration of the selected device
    pub fn current_config(&self) -> Result<SupportedStreamConfig, AudioError> {
        let device = self.current_device
            .as_ref()
            .ok_or_else(|| AudioError::InitializationFailed("No device selected".to_string()))?;

        device.default_output_config()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to get default config: {}", e)))
    }
}

/// Whether the output stream can be built for this sample format
pub fn is_supported_format(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}
