use std::fmt;

/// A device known to the adb server.
///
/// Populated from the `host:devices` listing by
/// [`crate::adb::AdbServer::devices`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The serial number used to address the device (e.g., `emulator-5554`).
    pub serial: String,
    /// The connection state reported by the server (e.g., "device", "unauthorized").
    pub state: String,
}

impl Device {
    /// Whether the device accepts commands.
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }

    /// Parses the body of a `host:devices` reply: one `serial\tstate` per line.
    pub fn parse_list(body: &str) -> Vec<Device> {
        body.lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let serial = fields.next()?;
                let state = fields.next()?;
                Some(Device {
                    serial: serial.to_string(),
                    state: state.to_string(),
                })
            })
            .collect()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_info = if self.is_online() {
            "[Ready]".to_string()
        } else {
            format!("[{}]", self.state)
        };

        write!(f, "{:<24} {}", self.serial, state_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_list_is_parsed() {
        let devices = Device::parse_list("emulator-5554\tdevice\n0123456789ABCDEF\tunauthorized\n\n");
        assert_eq!(devices.len(), 2);
        assert!(devices[0].is_online());
        assert_eq!(devices[1].serial, "0123456789ABCDEF");
        assert!(!devices[1].is_online());
    }
}
