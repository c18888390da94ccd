//! The search core: token store, batched acoustic scoring and the
//! frame-synchronous beam search itself.

pub mod decodable;
pub mod graph;
pub mod hash_list;
pub mod search;

pub use decodable::{AcousticModel, CachingDecodable, Decodable, FeatureSource};
pub use graph::{Arc, Fst, TransitionMap, VectorFst};
pub use hash_list::HashList;
pub use search::BeamSearchDecoder;
