//! Communication: point-to-point messaging, collectives built on it, and
//! the wire records they exchange.

pub mod collective;
pub mod communicator;
pub mod wire;

pub use collective::{
    agree, all_gather_pod, all_gather_u64, all_reduce_and, all_reduce_sum_f64, all_reduce_sum_u64, all_to_all_pod,
    barrier,
};
pub use communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
