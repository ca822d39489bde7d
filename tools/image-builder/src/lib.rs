//! Streaming, layered OCI image construction (§4.5): base/packages/role
//! tar-context producers plus the `ImageDaemon` abstraction they and the
//! compilator's container-isolation mode run against.

mod base_layer;
mod daemon;
mod dockerfile;
mod error;
mod labels;
mod layers;
mod packages_layer;
mod role_layer;
mod tar_writer;

pub use base_layer::{produce as produce_base_layer, BaseLayerInputs};
pub use daemon::{BestImageMatch, DockerCliDaemon, ImageDaemon, ImageInfo};
pub use dockerfile::GENERATOR_LABEL;
pub use error::{Error, Result};
pub use layers::TarProducer;
pub use packages_layer::{
    gather_unique_packages, plan as plan_packages_layer, produce as produce_packages_layer,
    Plan as PackagesLayerPlan,
};
pub use role_layer::{plan as plan_role_layer, produce as produce_role_layer, Plan as RoleLayerPlan};
