pub mod beta_prior;
pub mod contingency;
pub mod fdr;
pub mod method_comparison;
pub mod ratio_imputation;
pub mod report;
pub mod shrinkage;
