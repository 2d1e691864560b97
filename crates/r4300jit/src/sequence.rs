use r4300::{Address, Ins};
use std::ops::Deref;

/// A sequence of VR4300 instructions.
#[derive(Clone, Default)]
pub struct Sequence(pub Vec<Ins>);

impl Sequence {
    /// Whether this sequence, located at `start`, is a branch to itself with a no-op in its delay
    /// slot.
    pub fn is_idle_loop(&self, start: Address) -> bool {
        self.len() == 2 && self[0].branches_to_self(start) && self[1].is_nop()
    }
}

impl Deref for Sequence {
    type Target = [Ins];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for ins in &self.0 {
            writeln!(f, "{ins}")?;
        }

        Ok(())
    }
}
