//! Peripheral identification and command types.

/// Opaque identifier of a peripheral.
///
/// Assigned by [`PeripheralSet::add`](crate::PeripheralSet::add) and compared
/// by value, so the application can tell which peripheral posted an event.
///
/// # Example
///
/// ```
/// use audio_pipeline::PeripheralId;
///
/// let keys = PeripheralId::new(1);
/// assert_eq!(keys, PeripheralId::new(1));
/// assert_eq!(keys.to_string(), "periph#1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(u64);

impl PeripheralId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "periph#{}", self.0)
    }
}

impl From<u64> for PeripheralId {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

/// Category of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeripheralKind {
    /// GPIO push buttons.
    Button,
    /// Capacitive touch pads.
    Touch,
    /// Resistor-ladder buttons read through an ADC.
    AdcButton,
    /// Bluetooth A2DP sink with AVRCP remote control.
    Bluetooth,
    /// Status LED.
    Led,
    /// Anything else.
    Custom,
}

impl PeripheralKind {
    /// Returns true for peripherals that report key presses.
    #[must_use]
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Button | Self::Touch | Self::AdcButton)
    }
}

/// Event reported by a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeripheralCommand {
    /// A key went down; payload is the key id.
    ButtonPressed,
    /// A key went up; payload is the key id.
    ButtonReleased,
    /// A touch pad was tapped; payload is the pad id.
    TouchTap,
    /// A remote device connected.
    BluetoothConnected,
    /// The remote device disconnected.
    BluetoothDisconnected,
    /// The remote device started streaming audio.
    BluetoothAudioStarted,
    /// The remote device paused or ended its audio stream.
    BluetoothAudioSuspended,
    /// Driver-specific command.
    Custom(u16),
}

impl PeripheralCommand {
    /// Returns true for key and touch events.
    #[must_use]
    pub fn is_key_event(&self) -> bool {
        matches!(self, Self::ButtonPressed | Self::TouchTap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_id_equality() {
        assert_eq!(PeripheralId::new(4), PeripheralId::from(4));
        assert_ne!(PeripheralId::new(4), PeripheralId::new(5));
        assert_eq!(PeripheralId::new(4).get(), 4);
    }

    #[test]
    fn test_peripheral_id_display() {
        assert_eq!(format!("{}", PeripheralId::new(12)), "periph#12");
    }

    #[test]
    fn test_peripheral_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PeripheralId::new(1));
        set.insert(PeripheralId::new(2));
        set.insert(PeripheralId::new(1)); // duplicate

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_input_kinds() {
        assert!(PeripheralKind::Touch.is_input());
        assert!(PeripheralKind::AdcButton.is_input());
        assert!(!PeripheralKind::Bluetooth.is_input());
    }

    #[test]
    fn test_key_events() {
        assert!(PeripheralCommand::TouchTap.is_key_event());
        assert!(!PeripheralCommand::ButtonReleased.is_key_event());
        assert!(!PeripheralCommand::Custom(7).is_key_event());
    }
}
