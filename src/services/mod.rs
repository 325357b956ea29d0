//! Service layer of the probing engine.
//!
//! - Input expansion (`TargetNormalizer`) and resolution (`Resolver`)
//! - Network transports (`ReqwestTransport`, `RawTransport`, `DumpingTransport`)
//! - Per-target probing (`Prober`) and redirect following (`RedirectFollower`)
//! - Response classification (`ResponseClassifier`)

pub mod classifier;
pub mod normalizer;
pub mod prober;
pub mod redirects;
pub mod resolver;
pub mod transport;

pub use classifier::ResponseClassifier;
pub use normalizer::{Deduper, TargetInput, TargetNormalizer};
pub use prober::{Prober, SchemeOutcome};
pub use redirects::{FollowOutcome, FollowStop, RedirectFollower, RedirectPolicy};
pub use resolver::{AddressFilter, Resolver};
pub use transport::{
    DumpingTransport, FetchedResponse, ProbeRequest, RawTransport, ReqwestTransport, Transport,
    dump_response,
};
