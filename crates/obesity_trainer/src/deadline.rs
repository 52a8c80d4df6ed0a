use std::time::{Duration, Instant};

/// Time budget for one fit, checked by the boosting loop once per round.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    /// `None` or a zero budget means unbounded.
    pub fn from_secs(secs: Option<u64>) -> Self {
        match secs {
            Some(s) if s > 0 => Self::after(Duration::from_secs(s)),
            _ => Self::unbounded(),
        }
    }

    pub fn expired(&self) -> bool {
        self.limit.map_or(false, |limit| self.started.elapsed() >= limit)
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_expires_immediately() {
        assert!(Deadline::after(Duration::ZERO).expired());
        assert!(!Deadline::unbounded().expired());
        assert!(!Deadline::after(Duration::from_secs(3600)).expired());
        assert!(Deadline::from_secs(Some(0)).limit().is_none());
    }
}
