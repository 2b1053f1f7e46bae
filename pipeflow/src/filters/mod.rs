//! Ready-made stream stages.
//!
//! Every filter reads the session's input and writes the session's output,
//! so filters compose with [`line`](crate::pipeline::line) the same way
//! external processes do:
//!
//! ```rust,ignore
//! use pipeflow::prelude::*;
//! use pipeflow::filters::{contains, first};
//!
//! let stage = line(vec![exec("ls", ["-1"]), contains(".rs"), first(3)]);
//! let names = output(stage.as_ref()).await?;
//! ```
//!
//! Byte and string arguments share one implementation: anything that is
//! `AsRef<[u8]>` works.

mod codec;
mod io;
mod lines;
mod regexp;
mod text;

pub use codec::{
    base64_decode, base64_encode, gzip_decode, gzip_encode, json_decode, json_encode,
    Base64Decode, Base64Encode, GzipDecode, GzipEncode, JsonDecode, JsonEncode, JsonSlot,
};
pub use io::{read_from, tee, write_to, ReadFrom, Tee, WriteTo};
pub use lines::{
    filter, first, first_bytes, last, replace, trim_first, trim_last, varargs, Filter,
    FirstBytes, Lines, Replace, Varargs, Window,
};
pub use regexp::Regexp;
pub use text::{
    contains, has_prefix, has_suffix, repeat, replace_all, trim_prefix, trim_suffix, Literal,
    Repeat,
};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Chunk size used by filters that process raw bytes.
pub(crate) const CHUNK_SIZE: usize = 32 * 1024;

/// Reads the next `\n`-terminated line into `line`, without its terminator.
///
/// Returns `None` at end of input, otherwise whether the line was terminated.
pub(crate) async fn next_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    if reader.read_until(b'\n', line).await? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        Ok(Some(true))
    } else {
        Ok(Some(false))
    }
}
