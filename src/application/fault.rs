use crate::domain::{Cents, format_cents};

/// Simulated storage failure for exercising the rollback and divergence paths.
///
/// Disabled unless configured. When armed, a transaction whose amount equals
/// the trigger fails after its row is written and before the balance is saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultInjection {
    trigger: Option<Cents>,
}

impl FaultInjection {
    /// Amount used by the demo setup: 999.99.
    pub const DEMO_TRIGGER: Cents = 99_999;

    pub fn disabled() -> Self {
        Self { trigger: None }
    }

    pub fn demo() -> Self {
        Self::on_amount(Self::DEMO_TRIGGER)
    }

    pub fn on_amount(amount: Cents) -> Self {
        Self {
            trigger: Some(amount),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.trigger.is_some()
    }

    pub(crate) fn check(&self, amount: Cents) -> anyhow::Result<()> {
        if self.trigger == Some(amount) {
            anyhow::bail!(
                "simulated database error (fault injection on amount {})",
                format_cents(amount)
            );
        }
        Ok(())
    }
}
