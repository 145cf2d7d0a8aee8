//! Function chains: header codec, expressions, endpoint resolution and execution

pub mod descriptor;
pub mod endpoint;
pub mod executor;
pub mod expression;

pub use descriptor::{
    decode, encode, validate_name, ChainDescriptor, EncodedChain, FunctionStep, CHAIN_DELIMITER,
    CHAIN_HEADER, OPTIONS_HEADER,
};
pub use endpoint::{Endpoint, EndpointResolver};
pub use executor::{ChainExecutor, ChainRun, ExecutorConfig};
pub use expression::parse_expression;
