// Post-hoc codebook evaluation

pub mod network;

pub use network::{
    CodebookMetrics, ComparisonPackage, EvaluationConfig, NetworkEvaluator, NetworkLink,
    NetworkNode,
};
