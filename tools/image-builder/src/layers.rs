//! Shared pieces used by more than one layer producer: a `TarProducer`
//! contract and a small helper for writing the per-layer Dockerfile as the
//! first entry of a tar context.

use crate::error::{self, Result};
use crate::tar_writer;
use snafu::ResultExt;
use std::io::Write;

/// A callable that writes a complete build context to a tar sink (§4.5).
/// Boxed and `Send` so a layer can be planned on one worker and streamed by
/// another without cloning the underlying compiled trees.
pub type TarProducer = Box<dyn FnOnce(&mut dyn Write) -> Result<()> + Send>;

pub(crate) fn write_dockerfile<W: Write>(builder: &mut tar::Builder<W>, lines: &[String]) -> Result<()> {
    let mut contents = lines.join("\n");
    contents.push('\n');
    tar_writer::append_bytes(builder, "Dockerfile", contents.as_bytes(), 0o644)
}

pub(crate) fn finish<W: Write>(builder: tar::Builder<W>) -> Result<()> {
    builder.into_inner().map(|_| ()).context(error::TarBuildSnafu)
}
