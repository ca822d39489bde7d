//! The base layer: a Dockerfile derived from the stemcell plus bundled
//! helper assets (monit config, process-supervisor `run.sh`) (§4.5).

use crate::dockerfile;
use crate::layers::{self, TarProducer};
use crate::tar_writer;

pub struct BaseLayerInputs {
    pub stemcell: String,
    /// Tar archive (already built) of the stemcell's root filesystem
    /// overlay, streamed byte-for-byte as `root-tar` inside the context.
    pub root_tar: Vec<u8>,
    pub monitrc: Vec<u8>,
    pub run_sh: Vec<u8>,
}

pub fn produce(inputs: BaseLayerInputs) -> TarProducer {
    Box::new(move |sink| {
        let mut builder = tar::Builder::new(sink);
        let lines = dockerfile::base_layer_dockerfile(&inputs.stemcell);
        layers::write_dockerfile(&mut builder, &lines)?;
        tar_writer::append_bytes(&mut builder, "root-tar", &inputs.root_tar, 0o644)?;
        tar_writer::append_bytes(&mut builder, "monitrc", &inputs.monitrc, 0o644)?;
        tar_writer::append_bytes(&mut builder, "run.sh", &inputs.run_sh, 0o755)?;
        layers::finish(builder)
    })
}
