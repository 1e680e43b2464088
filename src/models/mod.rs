mod context;
mod rpc;

pub use context::{RequestContext, iso, iso_timestamp};
pub use rpc::{JSONRPC_VERSION, RequestId, RpcRequest, RpcResponse};
