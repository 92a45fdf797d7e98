//! Text rendering for progress updates.

/// Turns a step's progress into the text of an update.
pub trait ProgressFormatter: Send + Sync {
    /// Describes `step` at `step_fraction` while the whole run is at
    /// `overall`. Both fractions are in `[0, 1]`.
    fn describe(&self, step: &str, step_fraction: f64, overall: f64) -> String;
}

/// Renders `"<step>: 50% (overall 30%)"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatter;

impl ProgressFormatter for DefaultFormatter {
    fn describe(&self, step: &str, step_fraction: f64, overall: f64) -> String {
        format!(
            "{step}: {:.0}% (overall {:.0}%)",
            step_fraction * 100.0,
            overall * 100.0
        )
    }
}

impl<F> ProgressFormatter for F
where
    F: Fn(&str, f64, f64) -> String + Send + Sync,
{
    fn describe(&self, step: &str, step_fraction: f64, overall: f64) -> String {
        self(step, step_fraction, overall)
    }
}
