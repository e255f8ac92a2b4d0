//! Interrupt Handling Types for Drivers

/// Interrupt return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReturn {
    /// Interrupt was not from this device
    None,
    /// Interrupt was handled
    Handled,
}

impl InterruptReturn {
    pub fn handled(&self) -> bool {
        *self == InterruptReturn::Handled
    }
}
