use std::time::Duration;

use crate::{error::Result, session::DeviceSession, types::Percentage};

/// Time to wait after commanding an actuator from `initial` to `target`
///
/// Proportional to the distance travelled: `|target - initial| / 100` of a
/// full traversal. The actuator never reports completion, so this is the
/// only signal that motion has finished.
///
/// Both ends are clamped to 0-100, so a bogus reading never holds longer
/// than a full traversal.
#[must_use]
pub fn hold_duration(initial: u64, target: u64, max_travel: Duration) -> Duration {
    let delta = initial.min(100).abs_diff(target.min(100));
    let delta = u32::try_from(delta).unwrap_or(100);
    max_travel.saturating_mul(delta) / 100
}

/// A position-dependent write for one characteristic on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement<'a> {
    /// Characteristic name
    pub characteristic: &'a str,
    /// Sub-index for compound characteristics
    pub sub_index: Option<usize>,
    /// Value read before the write
    pub initial: u64,
    /// Commanded value
    pub target: Percentage,
}

impl Movement<'_> {
    /// Hold applied after the write; zero for actuators without travel time
    #[must_use]
    pub fn hold(&self, session: &DeviceSession, max_travel: Duration) -> Duration {
        if session.index().is_movement(self.characteristic) {
            hold_duration(self.initial, u64::from(self.target.get()), max_travel)
        } else {
            Duration::ZERO
        }
    }

    /// Write the target and block until motion is expected to have finished
    ///
    /// An `initial` equal to `target` still writes, with no hold.
    ///
    /// # Errors
    ///
    /// Propagates the session's write error; no hold is applied then.
    pub async fn execute(&self, session: &DeviceSession, max_travel: Duration) -> Result<Duration> {
        let hold = self.hold(session, max_travel);
        session
            .write_and_hold(
                self.characteristic,
                self.sub_index,
                self.target.to_payload(),
                hold,
            )
            .await?;
        Ok(hold)
    }
}
