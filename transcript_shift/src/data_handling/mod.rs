pub mod expression_matrix;
pub mod replicates;
