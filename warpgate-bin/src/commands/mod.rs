pub(crate) mod extract;
pub(crate) mod probe;
pub(crate) mod tiers;

pub(crate) use extract::extract;
pub(crate) use probe::probe;
pub(crate) use tiers::tiers;
