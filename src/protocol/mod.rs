//! Wire protocol: the frame codec and the request/response payload schema.

pub mod frame;
pub mod message;

pub use frame::{Frame, FrameType};
pub use message::{
    decode_payload, encode_payload, DeleteRequest, ErrorCode, ErrorResponse, FileInfo,
    ListRequest, ListResponse, MkdirRequest, ReadRequest, ReadResponse, RenameRequest,
    ResponseBody, StatRequest, StatResponse, WriteRequest, WriteResponse,
};
