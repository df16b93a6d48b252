/// ETL Module
///
/// The per-block stages shared by every adapter:
/// - Extract: page subgraph collections until exhausted
/// - Transform: fold records into per-position balances
/// - Emit: turn balances into output rows
/// - Load: read the block list and write CSV rows
pub mod emit;
pub mod extract;
pub mod load;
pub mod transform;
