pub mod cdc;
pub mod migrate;
pub mod serve;
pub mod worker;
