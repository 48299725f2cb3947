use std::{process, sync::Arc, time::Duration};

use postwire::{
    application::{
        error::AppError,
        posts::{PostService, PostServiceConfig},
        repos::{PostQuery, PostStore},
        session::{AdminAuthorizer, AdminCapability},
    },
    cache::{
        BridgeStatus, CacheConfig, CacheConsumer, CacheState, CacheTrigger, EventQueue, PostCache,
        RealtimeBridge, RealtimeConfig,
    },
    config::{self, StoreBackend},
    domain::{
        entities::PostRecord,
        posts::{format_read_time, split_featured},
        types::PostStatus,
    },
    infra::{db::PostgresPostStore, error::InfraError, memory::InMemoryPostStore, telemetry},
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const CLI_ACTOR: &str = "cli";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?report.messages, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?report.messages, "application error");
    });
}

/// Everything a command needs, wired once per process.
struct AppContext {
    store: Arc<dyn PostStore>,
    postgres: Option<PostgresPostStore>,
    service: PostService,
    cache: Arc<PostCache>,
    trigger: Arc<CacheTrigger>,
    authorizer: AdminAuthorizer,
    admin_token: Option<String>,
}

impl AppContext {
    fn authorize(&self) -> Result<AdminCapability, AppError> {
        self.authorizer
            .authorize(CLI_ACTOR, self.admin_token.as_deref())
            .map_err(AppError::from)
    }
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    if let config::Command::TokenDigest(args) = &cli_args.command {
        println!("{}", AdminAuthorizer::token_digest(&args.token));
        return Ok(());
    }

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let context = build_application_context(&settings, cli_args.admin_token.clone()).await?;

    match cli_args.command {
        config::Command::List(args) => run_list(&context, args).await,
        config::Command::Show(args) => run_show(&context, args).await,
        config::Command::Create(args) => run_create(&context, *args).await,
        config::Command::Update(args) => run_update(&context, *args).await,
        config::Command::Delete(args) => run_delete(&context, args).await,
        config::Command::Watch(args) => run_watch(&context, &settings, args).await,
        config::Command::Migrate => run_migrate(&context).await,
        config::Command::TokenDigest(_) => Ok(()),
    }
}

async fn build_application_context(
    settings: &config::Settings,
    admin_token: Option<String>,
) -> Result<AppContext, AppError> {
    let (store, postgres): (Arc<dyn PostStore>, Option<PostgresPostStore>) =
        match settings.store.backend {
            StoreBackend::Memory => {
                let store = if settings.store.seed_sample_posts {
                    InMemoryPostStore::with_sample_posts()
                } else {
                    InMemoryPostStore::new()
                };
                (Arc::new(store), None)
            }
            StoreBackend::Postgres => {
                let store = PostgresPostStore::connect(&settings.database).await?;
                store
                    .health_check()
                    .await
                    .map_err(|err| InfraError::database(format!("health check failed: {err}")))?;
                (Arc::new(store.clone()), Some(store))
            }
        };

    info!(
        backend = store.backend_name(),
        cache_enabled = settings.cache.enabled,
        "Post store ready"
    );

    let service_config = PostServiceConfig {
        request_timeout: settings.store.request_timeout,
        default_author: settings.posts.default_author.clone(),
    };
    let cache_config = CacheConfig::from(&settings.cache);

    // The cache reads through a service without a trigger; writers notify it.
    let cache = PostCache::new(
        cache_config.clone(),
        PostService::new(store.clone(), service_config.clone()),
    );
    let queue = Arc::new(EventQueue::new(cache_config.event_queue_limit));
    let consumer = Arc::new(CacheConsumer::new(
        cache_config.clone(),
        cache.clone(),
        queue.clone(),
    ));
    let trigger = Arc::new(CacheTrigger::new(cache_config, queue, consumer));
    let service =
        PostService::new(store.clone(), service_config).with_cache_trigger(trigger.clone());

    let authorizer = match settings.admin.token_sha256.as_deref() {
        Some(digest) => AdminAuthorizer::from_token_sha256(digest)?,
        None => match admin_token.as_deref() {
            // Without a configured digest the supplied token defines itself.
            Some(token) => AdminAuthorizer::from_token(token),
            None => AdminAuthorizer::disabled(),
        },
    };

    Ok(AppContext {
        store,
        postgres,
        service,
        cache,
        trigger,
        authorizer,
        admin_token,
    })
}

async fn run_list(context: &AppContext, args: config::ListArgs) -> Result<(), AppError> {
    let filtered = args.search.is_some() || args.published || args.limit.is_some();
    let posts: Arc<Vec<PostRecord>> = if filtered {
        let query = PostQuery {
            status: args.published.then_some(PostStatus::Published),
            search: args.search,
            limit: args.limit,
        };
        Arc::new(context.service.find_posts(&query).await?)
    } else {
        context.cache.fetch_list().await?
    };

    if args.json {
        print_json(posts.as_ref())?;
    } else {
        print_listing(&posts);
    }
    Ok(())
}

async fn run_show(context: &AppContext, args: config::ShowArgs) -> Result<(), AppError> {
    let post = context.cache.fetch_post(args.id).await?;

    if args.json {
        print_json(post.as_ref())?;
        return Ok(());
    }

    println!("{}", post.title);
    println!(
        "{} | {} | {} | {}",
        post.author,
        post.category,
        post.published_at.date(),
        format_read_time(&post.content)
    );
    if !post.tags.is_empty() {
        println!("tags: {}", post.tags.join(", "));
    }
    println!();
    println!("{}", post.excerpt);
    println!();
    println!("{}", post.content);
    Ok(())
}

async fn run_create(context: &AppContext, args: config::CreateArgs) -> Result<(), AppError> {
    let capability = context.authorize()?;
    let content = match (&args.content, &args.content_file) {
        (Some(content), _) => content.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .map_err(InfraError::from)?,
        (None, None) => String::new(),
    };

    let post = context
        .service
        .create_post(&capability, args.into_draft(content))
        .await?;
    println!("{}", post.id);
    Ok(())
}

async fn run_update(context: &AppContext, args: config::UpdateArgs) -> Result<(), AppError> {
    let capability = context.authorize()?;
    let content = match (&args.content, &args.content_file) {
        (Some(content), _) => Some(content.clone()),
        (None, Some(path)) => Some(
            tokio::fs::read_to_string(path)
                .await
                .map_err(InfraError::from)?,
        ),
        (None, None) => None,
    };

    let id = args.id;
    let post = context
        .service
        .update_post(&capability, id, args.into_patch(content))
        .await?;
    println!("{} updated at {}", post.id, post.updated_at);
    Ok(())
}

async fn run_delete(context: &AppContext, args: config::DeleteArgs) -> Result<(), AppError> {
    let capability = context.authorize()?;
    context.service.delete_post(&capability, args.id).await?;
    println!("{} deleted", args.id);
    Ok(())
}

async fn run_watch(
    context: &AppContext,
    settings: &config::Settings,
    args: config::WatchArgs,
) -> Result<(), AppError> {
    let mut states = context.cache.subscribe_list();
    let handle = if settings.realtime.enabled {
        Some(
            RealtimeBridge::new(
                context.store.clone(),
                context.trigger.clone(),
                RealtimeConfig::from(&settings.realtime),
            )
            .start(),
        )
    } else {
        warn!("Realtime disabled; the listing will not refresh by itself");
        None
    };
    let mut bridge_status: Option<watch::Receiver<BridgeStatus>> =
        handle.as_ref().map(|handle| handle.status_receiver());

    print_list_state(&context.cache.list_state());

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "Failed to listen for Ctrl-C");
                    futures::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(deadline);

    loop {
        let status_changed = async {
            match bridge_status.as_mut() {
                Some(receiver) => receiver.changed().await.is_ok(),
                None => futures::future::pending().await,
            }
        };

        tokio::select! {
            _ = &mut deadline => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if state.is_stale() {
                    // Reading a stale entry schedules its refresh.
                    context.cache.list_state();
                }
                print_list_state(&state);
            }
            alive = status_changed => {
                match bridge_status.as_ref().filter(|_| alive) {
                    Some(receiver) => {
                        let status = receiver.borrow().clone();
                        info!(status = ?status, "Realtime bridge status changed");
                    }
                    None => bridge_status = None,
                }
            }
        }
    }

    if let Some(handle) = handle {
        handle.stop().await;
    }
    Ok(())
}

async fn run_migrate(context: &AppContext) -> Result<(), AppError> {
    let Some(store) = context.postgres.as_ref() else {
        return Err(InfraError::unsupported(context.store.backend_name(), "migrations").into());
    };
    store.run_migrations().await?;
    info!("Migrations applied");
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode JSON: {err}")))?;
    println!("{rendered}");
    Ok(())
}

fn print_listing(posts: &[PostRecord]) {
    if posts.is_empty() {
        println!("No posts.");
        return;
    }

    let (featured, regular) = split_featured(posts);
    if !featured.is_empty() {
        println!("Featured");
        for post in featured {
            print_post_line(post);
        }
        println!();
    }
    for post in regular {
        print_post_line(post);
    }
}

fn print_post_line(post: &PostRecord) {
    println!(
        "{}  {:<9}  {}  {}  [{}, {}]",
        post.id,
        post.status,
        post.published_at.date(),
        post.title,
        post.category,
        format_read_time(&post.content)
    );
}

fn print_list_state(state: &CacheState<Vec<PostRecord>>) {
    match state {
        CacheState::Empty => {}
        CacheState::Loading { previous: None } => println!("Loading posts..."),
        CacheState::Error { cause, previous } => {
            println!("! {cause}");
            if let Some(posts) = previous {
                println!("(showing {} cached posts)", posts.len());
                print_listing(posts);
            }
        }
        other => {
            if let Some(posts) = other.data() {
                println!("-- {} posts ({}) --", posts.len(), other.label());
                print_listing(posts);
            }
        }
    }
}
