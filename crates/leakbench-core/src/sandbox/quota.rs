//! Output quota for printed values.

/// Error text raised inside the fragment once the quota is spent.
pub const QUOTA_EXCEEDED_MESSAGE: &str = "Output limit exceeded: too many values printed";

/// Cumulative count of printed values for one namespace.
///
/// The counter is never reset while the namespace lives, so the quota spans
/// every fragment of an episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintQuota {
    allowed: usize,
    used: usize,
}

impl PrintQuota {
    pub fn new(allowed: usize) -> Self {
        Self { allowed, used: 0 }
    }

    /// Record `values` printed values. Fails once the total exceeds the quota;
    /// the attempted values still count.
    pub fn charge(&mut self, values: usize) -> Result<(), &'static str> {
        self.used = self.used.saturating_add(values);
        if self.used > self.allowed {
            Err(QUOTA_EXCEEDED_MESSAGE)
        } else {
            Ok(())
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn allowed(&self) -> usize {
        self.allowed
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.allowed
    }
}
