use anyhow::{Context as _, bail};

use landscape_balancer::LoadBalancerMapping;
use landscape_core::{DatabaseEndpoint, Redirect, ReleaseSelector, parse_duration};
use landscape_deploy::HostSpec;
use landscape_orchestrator::{
    ArchiveRequest, CreateReplicaSetRequest, ReplicaRequest, UpgradeRequest,
};

use super::{Context, print_json};
use crate::{CreateArgs, ReplicationArgs};

pub struct ArchiveArgs<'a> {
    pub remove_source: bool,
    pub database_destination: Option<&'a str>,
    pub compare_delay: &'a str,
    pub compare_attempts: u32,
    pub bearer_token: Option<String>,
}

async fn create_request(
    ctx: &Context,
    args: &CreateArgs,
) -> anyhow::Result<CreateReplicaSetRequest> {
    let preferred_replica_host = match args.replica_host.as_deref() {
        Some(id) => Some(ctx.host(Some(id)).await?),
        None => None,
    };
    Ok(CreateReplicaSetRequest {
        release: ReleaseSelector::from_arg(&args.release),
        domain: args.domain.clone(),
        mapping: if args.dynamic {
            LoadBalancerMapping::Dynamic
        } else {
            LoadBalancerMapping::Dns
        },
        redirect: args
            .redirect
            .as_deref()
            .map(Redirect::to_path)
            .unwrap_or_default(),
        master_host: HostSpec {
            instance_type: args.instance_type.clone(),
            key_name: ctx.key_name.clone(),
            shared: args.shared_master,
            ..HostSpec::default()
        },
        master_port: args.port,
        replica_instance_type: args.replica_instance_type.clone(),
        min_replicas: args.min_replicas,
        preferred_replica_host,
        max_replicas: args.max_replicas,
        replication_bearer_token: args.replication.replication_token.clone(),
        memory: args.replication.memory(),
        ..CreateReplicaSetRequest::new(&args.name, &ctx.region)
    })
}

pub async fn create(ctx: &Context, args: &CreateArgs) -> anyhow::Result<()> {
    let request = create_request(ctx, args).await?;
    let replica_set = ctx.orchestrator.create(&request).await?;
    print_json(&replica_set)
}

pub async fn deploy(ctx: &Context, args: &CreateArgs, host: Option<&str>) -> anyhow::Result<()> {
    let host = ctx.host(host).await?;
    let request = create_request(ctx, args).await?;
    let replica_set = ctx.orchestrator.deploy_to_existing_host(&request, &host).await?;
    print_json(&replica_set)
}

pub async fn deploy_replica(
    ctx: &Context,
    name: &str,
    host: Option<&str>,
    release: Option<&str>,
    replication: &ReplicationArgs,
) -> anyhow::Result<()> {
    let host = ctx.host(host).await?;
    let request = ReplicaRequest {
        release: release.map(ReleaseSelector::from_arg),
        replication_bearer_token: replication.replication_token.clone(),
        memory: replication.memory(),
    };
    let replica = ctx
        .orchestrator
        .deploy_replica_to_existing_host(&ctx.region, name, &host, &request)
        .await?;
    print_json(&replica)
}

pub async fn upgrade(
    ctx: &Context,
    name: &str,
    release: &str,
    replication: &ReplicationArgs,
) -> anyhow::Result<()> {
    let request = UpgradeRequest {
        release: ReleaseSelector::from_arg(release),
        replication_bearer_token: replication.replication_token.clone(),
        memory: replication.memory(),
    };
    let report = ctx.orchestrator.upgrade(&ctx.region, name, &request).await?;
    print_json(&report)
}

pub async fn archive(ctx: &Context, name: &str, args: ArchiveArgs<'_>) -> anyhow::Result<()> {
    let Some(compare_delay) = parse_duration(args.compare_delay) else {
        bail!("invalid --compare-delay {:?}", args.compare_delay);
    };
    let database_destination = args
        .database_destination
        .map(parse_database_endpoint)
        .transpose()?;
    let request = ArchiveRequest {
        bearer_token: args.bearer_token,
        compare_delay,
        max_compare_attempts: args.compare_attempts,
        remove_source: args.remove_source,
        database_destination,
    };
    let outcome = ctx.orchestrator.archive(&ctx.region, name, &request).await?;
    print_json(&outcome)
}

pub async fn remove(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let report = ctx.orchestrator.remove(&ctx.region, name).await?;
    print_json(&report)
}

pub async fn show(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let replica_set = ctx
        .orchestrator
        .replica_set(&ctx.region, name)
        .await?
        .with_context(|| format!("no replica set {name} in {}", ctx.region))?;
    print_json(&replica_set)
}

/// `mongodb://host:27017/name` splits into connection URI and database name.
fn parse_database_endpoint(arg: &str) -> anyhow::Result<DatabaseEndpoint> {
    let Some((uri, name)) = arg.rsplit_once('/') else {
        bail!("database destination {arg:?} has no /<name> suffix");
    };
    if name.is_empty() || uri.ends_with('/') || !uri.contains("://") {
        bail!("database destination {arg:?} is not <uri>/<name>");
    }
    Ok(DatabaseEndpoint {
        connection_uri: uri.to_string(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_endpoint_splits_name() {
        let endpoint = parse_database_endpoint("mongodb://archive-db:27017/regatta42").unwrap();
        assert_eq!(endpoint.connection_uri, "mongodb://archive-db:27017");
        assert_eq!(endpoint.name, "regatta42");
    }

    #[test]
    fn database_endpoint_needs_name() {
        assert!(parse_database_endpoint("mongodb://archive-db:27017/").is_err());
        assert!(parse_database_endpoint("mongodb://archive-db:27017").is_err());
        assert!(parse_database_endpoint("regatta42").is_err());
    }

    fn create_args(replica_host: Option<String>) -> CreateArgs {
        CreateArgs {
            name: "regatta42".to_string(),
            release: "LATEST".to_string(),
            domain: Some("sapsailing.com".to_string()),
            dynamic: true,
            redirect: Some("/gwt/Home.html".to_string()),
            port: Some(8890),
            instance_type: None,
            shared_master: true,
            replica_instance_type: Some("c5.xlarge".to_string()),
            min_replicas: 0,
            replica_host,
            max_replicas: 4,
            replication: ReplicationArgs {
                replication_token: None,
                memory_mb: Some(2048),
            },
        }
    }

    #[tokio::test]
    async fn create_request_maps_flags() {
        let key_name = Some("landscape-ops".to_string());
        let ctx = Context::open(None, "eu-west-1", key_name, 0, &[]).await.unwrap();

        let request = create_request(&ctx, &create_args(None)).await.unwrap();

        assert_eq!(request.region, "eu-west-1");
        assert_eq!(request.release, ReleaseSelector::Latest);
        assert_eq!(request.mapping, LoadBalancerMapping::Dynamic);
        assert_eq!(request.redirect, Redirect::to_path("/gwt/Home.html"));
        assert_eq!(request.master_port, Some(8890));
        assert_eq!(request.master_host.key_name.as_deref(), Some("landscape-ops"));
        assert!(request.master_host.shared);
        assert_eq!(request.preferred_replica_host, None);
        assert_eq!(request.min_replicas, 0);
        assert_eq!(request.memory, landscape_core::MemorySizing::Megabytes(2048));
    }

    #[tokio::test(start_paused = true)]
    async fn replica_host_flag_resolves_seeded_host() {
        let ctx = Context::open(None, "eu-west-1", None, 2, &[]).await.unwrap();
        let wanted = ctx.shared_hosts[1].id.clone();

        let request = create_request(&ctx, &create_args(Some(wanted.clone())))
            .await
            .unwrap();
        assert_eq!(request.preferred_replica_host.map(|h| h.id), Some(wanted));

        let missing = create_request(&ctx, &create_args(Some("i-missing".to_string()))).await;
        assert!(missing.is_err());
    }
}
