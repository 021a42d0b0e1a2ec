pub mod broadcast_add;
pub mod elemwise_copy;

pub use broadcast_add::BroadcastAdd;
pub use elemwise_copy::ElemwiseCopy;
