pub mod mci;
pub mod pdc;
