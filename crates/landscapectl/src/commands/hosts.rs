use landscape_core::MachineImage;
use landscape_orchestrator::SharedHostRequest;

use super::{Context, print_json};

pub async fn update_image(
    ctx: &Context,
    names: &[String],
    image: Option<String>,
) -> anyhow::Result<()> {
    let image = image.map(|id| MachineImage {
        id,
        image_type: ctx.orchestrator.config().landscape.image_type.clone(),
        created_at: 0,
    });
    let updates = ctx
        .orchestrator
        .update_image(&ctx.region, names, image)
        .await?;
    print_json(&updates)
}

pub async fn eligible(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let hosts = ctx
        .orchestrator
        .eligible_shared_hosts(&ctx.region, name)
        .await?;
    print_json(&hosts)
}

pub async fn create_shared(
    ctx: &Context,
    instance_type: Option<String>,
    availability_zone: Option<String>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let request = SharedHostRequest {
        instance_type,
        availability_zone,
        name,
        key_name: ctx.key_name.clone(),
        image: None,
    };
    let host = ctx
        .orchestrator
        .create_empty_shared_host(&ctx.region, &request)
        .await?;
    print_json(&host)
}
