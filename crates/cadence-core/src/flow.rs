//! Flows move quantity from a source stock (`alpha`) to a destination stock
//! (`omega`).
//!
//! A flow's rate is stored per model time unit, after unit reconciliation:
//!
//! - booleans become 0 or 1;
//! - a rate in `widgets/months` in a model running in years is multiplied
//!   by 12;
//! - a unitless rate adopts the connected stock's unit;
//! - a rate whose material unit differs from the stock's is fatal.
//!
//! Non-negative flows clamp their rate at zero component-wise. During an RK4
//! step each stage rate is kept in `rk_primary`; once all four are known they
//! are blended into the rate used to move material.

use crate::clock::TimeUnit;
use crate::error::{ModelError, ModelResult};
use crate::fixed::Fixed128;
use crate::id::{EquationId, SolverId, StockId};
use crate::value::{Amount, AmountError, Quantity, Unit, Value};

/// A rate-valued connector between two stocks.
#[derive(Debug, Clone)]
pub struct Flow {
    pub(crate) name: String,
    pub(crate) solver: SolverId,
    pub(crate) equation: EquationId,
    pub(crate) alpha: Option<StockId>,
    pub(crate) omega: Option<StockId>,
    pub(crate) non_negative: bool,
    pub(crate) unit: Option<Unit>,
    pub(crate) rate: Option<Amount>,
    pub(crate) blended: Option<Amount>,
    pub(crate) use_blended: bool,
    pub(crate) rk_primary: [Option<Amount>; 4],
    pub(crate) history: Vec<Value>,
}

impl Flow {
    pub(crate) fn new(name: String, solver: SolverId, equation: EquationId) -> Self {
        Self {
            name,
            solver,
            equation,
            alpha: None,
            omega: None,
            non_negative: false,
            unit: None,
            rate: None,
            blended: None,
            use_blended: false,
            rk_primary: Default::default(),
            history: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solver(&self) -> SolverId {
        self.solver
    }

    pub fn alpha(&self) -> Option<StockId> {
        self.alpha
    }

    pub fn omega(&self) -> Option<StockId> {
        self.omega
    }

    pub fn is_non_negative(&self) -> bool {
        self.non_negative
    }

    /// Rate of the current stage, if it has been evaluated.
    pub fn rate(&self) -> Option<&Amount> {
        self.rate.as_ref()
    }

    pub fn blended_rate(&self) -> Option<&Amount> {
        self.blended.as_ref()
    }

    pub fn stage_rates(&self) -> &[Option<Amount>; 4] {
        &self.rk_primary
    }

    pub fn history(&self) -> &[Value] {
        &self.history
    }

    /// Rate used to move material: the RK4 blend once one has been made for
    /// the current step, the stage rate otherwise.
    pub fn rate_in_use(&self) -> Option<&Amount> {
        if self.use_blended {
            self.blended.as_ref().or(self.rate.as_ref())
        } else {
            self.rate.as_ref()
        }
    }

    /// Drop the cached stage rate. The RK4 stage history survives until
    /// [`reset_stages`](Self::reset_stages).
    pub(crate) fn clear_rate(&mut self) {
        self.rate = None;
    }

    pub(crate) fn reset_stages(&mut self) {
        self.rate = None;
        self.use_blended = false;
        self.rk_primary = Default::default();
    }

    /// Store the rate of RK stage `position` (1-based).
    pub(crate) fn set_stage_rate(&mut self, position: u8, rate: Amount) {
        let slot = usize::from(position.clamp(1, 4)) - 1;
        self.rk_primary[slot] = Some(rate.clone());
        self.rate = Some(rate);
    }

    /// Blend the four stage rates as `(k1 + 2k2 + 2k3 + k4) / 6` and restore
    /// the stage-1 rate. Stages never evaluated count as zero.
    pub(crate) fn blend(&mut self) -> ModelResult<()> {
        let Some(k1) = self.rk_primary[0].clone() else {
            return Ok(());
        };
        let zero = k1.zero_like();
        let k = |i: usize| self.rk_primary[i].clone().unwrap_or_else(|| zero.clone());
        let two = Fixed128::from_num(2);
        let six = Fixed128::from_num(6);
        let blended = k(1)
            .checked_scale(two)
            .and_then(|k2| k1.checked_add(&k2))
            .and_then(|s| s.checked_add(&k(2).checked_scale(two)?))
            .and_then(|s| s.checked_add(&k(3)))
            .and_then(|s| s.checked_div(six))
            .map_err(|e| self.blend_error(e))?;
        self.blended = Some(blended);
        self.rate = Some(k1);
        self.use_blended = true;
        Ok(())
    }

    fn blend_error(&self, err: AmountError) -> ModelError {
        match err {
            AmountError::Keys => ModelError::VectorShape {
                left: self.name.clone(),
                right: "its earlier stages".into(),
            },
            AmountError::Overflow => ModelError::Overflow {
                primitive: self.name.clone(),
            },
        }
    }

    /// Convert an evaluated rate into an amount per `time_unit` in the unit
    /// of the connected stock.
    pub(crate) fn reconcile(
        &self,
        value: &Value,
        stock: Option<(&str, &Unit)>,
        time_unit: TimeUnit,
    ) -> ModelResult<Amount> {
        let amount = match value {
            Value::Boolean(b) => Amount::Scalar(if *b { Fixed128::from_num(1) } else { Fixed128::ZERO }),
            Value::Quantity(q) => Amount::Scalar(self.reconcile_quantity(q, stock, time_unit)?),
            Value::Vector(v) => {
                let mut entries = Vec::with_capacity(v.len());
                for (key, item) in v.iter() {
                    match self.reconcile(item, stock, time_unit)? {
                        Amount::Scalar(c) => entries.push((key.to_string(), c)),
                        Amount::Vector(_) => return Err(self.invalid()),
                    }
                }
                Amount::Vector(entries)
            }
            Value::Text(_) | Value::Entity(_) => return Err(self.invalid()),
        };
        Ok(if self.non_negative {
            amount.clamp_non_negative()
        } else {
            amount
        })
    }

    fn reconcile_quantity(
        &self,
        q: &Quantity,
        stock: Option<(&str, &Unit)>,
        time_unit: TimeUnit,
    ) -> ModelResult<Fixed128> {
        let mut q = q.clone();
        if q.unit.is_dimensionless() {
            if let Some(declared) = &self.unit {
                q.unit = declared.clone();
            }
        }
        let q = q.per_time(time_unit).map_err(|e| e.within(&self.name))?;
        if let (Some(base), Some((stock_name, stock_unit))) = (&q.unit.base, stock) {
            if let Some(stock_base) = &stock_unit.base {
                if base != stock_base {
                    return Err(ModelError::IncompatibleUnits {
                        flow: self.name.clone(),
                        stock: stock_name.to_string(),
                        flow_unit: q.unit.to_string(),
                        stock_unit: stock_unit.to_string(),
                    });
                }
            }
        }
        Ok(q.magnitude)
    }

    fn invalid(&self) -> ModelError {
        ModelError::InvalidValue {
            primitive: self.name.clone(),
            expected: "a number, a boolean or a vector of numbers",
        }
    }

    /// Present a rate to equations, in the stock unit per model time unit.
    pub(crate) fn rate_value(amount: &Amount, stock_unit: Option<&Unit>, time_unit: TimeUnit) -> Value {
        let unit = Unit {
            base: stock_unit.and_then(|u| u.base.clone()),
            per: Some(time_unit),
        };
        amount.to_value(&unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixed;
    use slotmap::SlotMap;

    fn flow() -> Flow {
        let mut solvers: SlotMap<SolverId, ()> = SlotMap::with_key();
        Flow::new("hiring".into(), solvers.insert(()), EquationId(0))
    }

    #[test]
    fn unitless_rate_adopts_stock_unit() {
        let f = flow();
        let unit = Unit::of("people");
        let rate = f
            .reconcile(&Value::number(fixed(3.0)), Some(("staff", &unit)), TimeUnit::Years)
            .unwrap();
        assert_eq!(rate, Amount::Scalar(fixed(3.0)));
    }

    #[test]
    fn rate_is_converted_to_model_time_unit() {
        let f = flow();
        let unit = Unit::of("people");
        let monthly = Value::quantity(fixed(1.0), Unit::of("people").per(TimeUnit::Months));
        let rate = f.reconcile(&monthly, Some(("staff", &unit)), TimeUnit::Years).unwrap();
        assert_eq!(rate, Amount::Scalar(fixed(12.0)));
    }

    #[test]
    fn differing_material_units_are_fatal() {
        let f = flow();
        let unit = Unit::of("people");
        let err = f
            .reconcile(&Value::quantity(fixed(1.0), Unit::of("widgets")), Some(("staff", &unit)), TimeUnit::Years)
            .unwrap_err();
        assert_eq!(err.code(), 2001);
        assert!(err.to_string().contains("hiring") && err.to_string().contains("staff"));
    }

    #[test]
    fn booleans_and_clamping() {
        let mut f = flow();
        f.non_negative = true;
        assert_eq!(
            f.reconcile(&Value::Boolean(true), None, TimeUnit::Years).unwrap(),
            Amount::Scalar(fixed(1.0))
        );
        assert_eq!(
            f.reconcile(&Value::number(fixed(-5.0)), None, TimeUnit::Years).unwrap(),
            Amount::Scalar(Fixed128::ZERO)
        );
        assert_eq!(f.reconcile(&Value::Text("x".into()), None, TimeUnit::Years).unwrap_err().code(), 5002);
    }

    #[test]
    fn blend_weights_stages_and_restores_first() {
        let mut f = flow();
        for (pos, k) in [(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)] {
            f.set_stage_rate(pos, Amount::Scalar(fixed(k)));
        }
        f.blend().unwrap();
        // (1 + 4 + 6 + 4) / 6 = 2.5
        assert_eq!(f.blended_rate(), Some(&Amount::Scalar(fixed(2.5))));
        assert_eq!(f.rate(), Some(&Amount::Scalar(fixed(1.0))));
        assert_eq!(f.rate_in_use(), Some(&Amount::Scalar(fixed(2.5))));

        f.reset_stages();
        assert_eq!(f.rate_in_use(), None);
    }
}
