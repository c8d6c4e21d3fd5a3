//! Camera slot model.

use std::fmt;

use capture_session::OutputConfig;
use serde::{Deserialize, Serialize};

/// Logical camera position. Ordering is significant: multi-camera
/// operations walk positions front-to-right, and quota enforcement
/// closes excess slots in the reverse of this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotPosition {
    Front,
    Back,
    Left,
    Right,
}

impl SlotPosition {
    /// All positions in canonical order
    pub const ALL: [SlotPosition; 4] = [
        SlotPosition::Front,
        SlotPosition::Back,
        SlotPosition::Left,
        SlotPosition::Right,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotPosition::Front => "front",
            SlotPosition::Back => "back",
            SlotPosition::Left => "left",
            SlotPosition::Right => "right",
        }
    }
}

impl fmt::Display for SlotPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static configuration of one camera slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub position: SlotPosition,
    /// Host sensor id this slot binds to
    pub sensor_id: String,
    /// Output geometry (resolution, orientation, mirror, crop)
    pub output: OutputConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_order_front_to_right() {
        let mut sorted = SlotPosition::ALL;
        sorted.sort();
        assert_eq!(sorted, SlotPosition::ALL);
        assert_eq!(SlotPosition::Front.to_string(), "front");
        assert_eq!(SlotPosition::Right.to_string(), "right");
    }
}
