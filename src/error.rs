use thiserror::Error;

#[derive(Error, Debug)]
pub enum TierTableError {
    #[error("table geometry overflowed `usize`")]
    CapacityOverflow,
    #[error("allocation of `{0}` bytes failed")]
    AllocError(usize),
    #[error("overflow tier has no free slot within probe reach")]
    OverflowFull,
}

pub type Result<T> = std::result::Result<T, TierTableError>;
