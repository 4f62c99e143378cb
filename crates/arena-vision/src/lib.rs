pub mod candidate;
pub mod consensus;
pub mod geometry;
pub mod hash_matcher;
pub mod identify;
pub mod preprocess;
pub mod region_locator;
pub mod template_matcher;
pub mod text_matcher;
pub mod text_reader;

pub use candidate::{MatchCandidate, MatchSource};
pub use consensus::{combine, ConsensusConfig, ConsensusRule, Identification};
pub use geometry::RegionGeometryStore;
pub use hash_matcher::{hash_similarity, HashMatcher, ThresholdController};
pub use identify::{CardIdentifier, MatcherReadiness, RegionIdentification};
pub use region_locator::{LocatedRegions, LocatorConfig, RegionLocator, RegionSource};
pub use template_matcher::IconMatcher;
pub use text_matcher::TextMatcher;
pub use text_reader::{RecognizedText, TesseractReader, TextRecognizer};
