use std::{fmt, time::Duration};
use tracing::info;

use crate::{
    characteristic::{LIGHT, LOWER_LIFT, LOWER_VIB, NO_SNORE, UPPER_LIFT, UPPER_VIB, ZERO_G},
    dispatch::{CommandOutcome, Dispatcher, PositionTarget, WriteCommand},
    error::Result,
    types::{LightState, Percentage},
};

/// Gap between stopping the lower and the upper vibration motor
pub const VIBRATION_STOP_GAP: Duration = Duration::from_secs(1);

/// Upper lift position for the zero-gravity preset
pub const ZERO_G_UPPER: Percentage = Percentage::saturating(70);
/// Lower lift position for the zero-gravity preset
pub const ZERO_G_LOWER: Percentage = Percentage::saturating(31);
/// Upper lift position for the anti-snore preset
pub const NO_SNORE_UPPER: Percentage = Percentage::saturating(11);

/// Commands addressed to every bed device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BedCommand {
    /// Stop both vibration motors
    Stop,
    /// Lower both lifts fully
    Flat,
    /// Zero-gravity preset
    ZeroG,
    /// Anti-snore preset
    NoSnore,
    /// Move the upper lift
    MoveUpper(Percentage),
    /// Move the lower lift
    MoveLower(Percentage),
    /// Set upper vibration intensity
    SetUpperVib(Percentage),
    /// Set lower vibration intensity
    SetLowerVib(Percentage),
    /// Switch the light on
    LightOn,
    /// Switch the light off
    LightOff,
}

impl BedCommand {
    /// Whether the command needs each device's current position first
    #[must_use]
    pub const fn is_position_dependent(self) -> bool {
        matches!(
            self,
            Self::Flat | Self::ZeroG | Self::NoSnore | Self::MoveUpper(_) | Self::MoveLower(_)
        )
    }

    /// Targets for a position-dependent command
    #[must_use]
    pub fn targets(self) -> Vec<PositionTarget> {
        match self {
            Self::Flat => vec![
                PositionTarget::new(UPPER_LIFT, Percentage::ZERO),
                PositionTarget::new(LOWER_LIFT, Percentage::ZERO),
            ],
            Self::ZeroG => vec![
                PositionTarget::indexed(ZERO_G, 0, ZERO_G_UPPER),
                PositionTarget::indexed(ZERO_G, 1, ZERO_G_LOWER),
            ],
            Self::NoSnore => vec![PositionTarget::new(NO_SNORE, NO_SNORE_UPPER)],
            Self::MoveUpper(p) => vec![PositionTarget::new(UPPER_LIFT, p)],
            Self::MoveLower(p) => vec![PositionTarget::new(LOWER_LIFT, p)],
            _ => Vec::new(),
        }
    }

    /// Execute against every registered device
    pub async fn run(self, dispatcher: &Dispatcher) -> CommandOutcome<bool> {
        info!("Received request: {}", self);

        match self {
            Self::Stop => {
                let lower = dispatcher
                    .broadcast(WriteCommand::percentage(LOWER_VIB, Percentage::ZERO))
                    .await;
                tokio::time::sleep(VIBRATION_STOP_GAP).await;
                let upper = dispatcher
                    .broadcast(WriteCommand::percentage(UPPER_VIB, Percentage::ZERO))
                    .await;
                lower.and(upper)
            }
            Self::SetUpperVib(p) => {
                dispatcher
                    .broadcast(WriteCommand::percentage(UPPER_VIB, p))
                    .await
            }
            Self::SetLowerVib(p) => {
                dispatcher
                    .broadcast(WriteCommand::percentage(LOWER_VIB, p))
                    .await
            }
            Self::LightOn => {
                dispatcher
                    .broadcast(WriteCommand::percentage(LIGHT, Percentage::FULL))
                    .await
            }
            Self::LightOff => {
                dispatcher
                    .broadcast(WriteCommand::percentage(LIGHT, Percentage::ZERO))
                    .await
            }
            Self::Flat | Self::ZeroG | Self::NoSnore | Self::MoveUpper(_) | Self::MoveLower(_) => {
                dispatcher.read_then_write(self.targets()).await
            }
        }
    }
}

impl fmt::Display for BedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Flat => write!(f, "flat"),
            Self::ZeroG => write!(f, "zero G"),
            Self::NoSnore => write!(f, "no snore"),
            Self::MoveUpper(p) => write!(f, "move upper to {p}"),
            Self::MoveLower(p) => write!(f, "move lower to {p}"),
            Self::SetUpperVib(p) => write!(f, "set upper vib to {p}"),
            Self::SetLowerVib(p) => write!(f, "set lower vib to {p}"),
            Self::LightOn => write!(f, "light on"),
            Self::LightOff => write!(f, "light off"),
        }
    }
}

/// Readings taken from the primary device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BedQuery {
    /// Upper lift position
    UpperHeight,
    /// Lower lift position
    LowerHeight,
    /// Upper vibration intensity
    UpperVib,
    /// Lower vibration intensity
    LowerVib,
    /// Light on/off
    LightStatus,
}

impl BedQuery {
    /// Characteristic the query reads
    #[must_use]
    pub const fn characteristic(self) -> &'static str {
        match self {
            Self::UpperHeight => UPPER_LIFT,
            Self::LowerHeight => LOWER_LIFT,
            Self::UpperVib => UPPER_VIB,
            Self::LowerVib => LOWER_VIB,
            Self::LightStatus => LIGHT,
        }
    }

    /// Read the raw value from the primary device
    ///
    /// # Errors
    ///
    /// Returns the session's read error.
    pub async fn read(self, dispatcher: &Dispatcher) -> Result<u64> {
        info!("Received request to get {}", self.characteristic());
        dispatcher.read_primary(self.characteristic(), None).await
    }

    /// Read the light state from the primary device
    ///
    /// # Errors
    ///
    /// Returns the session's read error.
    pub async fn light_state(dispatcher: &Dispatcher) -> Result<LightState> {
        Self::LightStatus
            .read(dispatcher)
            .await
            .map(LightState::from_reading)
    }
}
