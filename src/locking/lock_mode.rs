/// Strength of a hold on a [`Lock`](crate::locking::lock::Lock).
///
/// Modes are totally ordered by strength: `NoLock < Shared < Exclusive`.
/// `NoLock` only ever appears as the answer to a query; it cannot be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LockMode {
    /// No hold at all.
    #[default]
    NoLock,
    /// Shared (read) hold. Any number of holders may share a lock.
    Shared,
    /// Exclusive (write) hold. Compatible with nothing held by anybody else.
    Exclusive,
}

impl LockMode {
    /// Returns true if a hold in `self` by one transaction can coexist with a
    /// hold in `other` by a different transaction.
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        match (self, other) {
            (LockMode::NoLock, _) | (_, LockMode::NoLock) => true,
            (LockMode::Shared, LockMode::Shared) => true,
            _ => false,
        }
    }

    /// Returns true if a hold in `self` already grants everything `requested` asks for.
    pub fn covers(self, requested: LockMode) -> bool {
        self >= requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility() {
        assert!(LockMode::Shared.is_compatible_with(LockMode::Shared));
        assert!(LockMode::NoLock.is_compatible_with(LockMode::Exclusive));
        assert!(!LockMode::Shared.is_compatible_with(LockMode::Exclusive));
        assert!(!LockMode::Exclusive.is_compatible_with(LockMode::Exclusive));
    }

    #[test]
    fn test_covers() {
        assert!(LockMode::Exclusive.covers(LockMode::Shared));
        assert!(LockMode::Shared.covers(LockMode::Shared));
        assert!(!LockMode::Shared.covers(LockMode::Exclusive));
        assert!(!LockMode::NoLock.covers(LockMode::Shared));
    }
}
