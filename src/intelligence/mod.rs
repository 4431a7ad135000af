pub mod qualifier;
pub mod reconstructor;
pub mod scorer;

pub use qualifier::{qualify, CriterionFailure, QualificationCriteria, QualificationOutcome};
pub use reconstructor::{reconstruct_positions, CostBasisPolicy, ReconstructedPositions};
pub use scorer::{score_wallet, MarkPrices};
