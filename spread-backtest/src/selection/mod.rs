pub mod selector;

pub use selector::{ContractSelector, Selection, SelectionMetric};
