pub mod envelope;
pub mod ids;
pub mod types;

pub use envelope::{
    Envelope, Method, Notification, Params, Request, ResponseResult, RpcError, decode, encode,
};
pub use ids::{RequestId, ResultSchema};
pub use types::{KlipperInfo, StatusQueryResult};
