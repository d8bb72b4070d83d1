use serde::{Deserialize, Serialize};

use super::metrics::MetricType;

/// User-supplied arithmetic aggregation across the target's triggers.
/// The formula is compiled once per target when its scalers cache is
/// installed and evaluated on every tick.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingModifiers {
    /// Expression over the declared trigger names, e.g. `a * 2 + b`.
    pub formula: String,
    /// Scale-to reference handed to the external consumer, in plain units.
    pub target: String,
    /// The composite value above which the target counts as active.
    /// Unset means any value above zero activates.
    #[serde(default)]
    pub activation_target: Option<String>,
    #[serde(default)]
    pub metric_type: MetricType,
}

impl ScalingModifiers {
    pub fn parsed_target(&self) -> anyhow::Result<f64> {
        let target: f64 = self
            .target
            .parse()
            .map_err(|_| anyhow::anyhow!("modifier target {} is not a number", self.target))?;
        if target <= 0.0 {
            anyhow::bail!("modifier target {} must be positive", self.target);
        }
        Ok(target)
    }

    pub fn parsed_activation_target(&self) -> anyhow::Result<f64> {
        match &self.activation_target {
            Some(raw) => raw.parse().map_err(|_| {
                anyhow::anyhow!("modifier activation target {} is not a number", raw)
            }),
            None => Ok(0.0),
        }
    }
}
