pub mod memory_counter;
pub mod memory_kv;
pub mod memory_rounds;

#[cfg(feature = "sql")]
pub mod sql_counter;

#[cfg(feature = "sql")]
pub mod sql_rounds;

#[cfg(feature = "etcd")]
pub mod etcd_kv;
