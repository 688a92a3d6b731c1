//! Media Watch CLI
//!
//! Scans media trees with a persistent change cache and keeps them current
//! by watching for filesystem changes.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use media_watch::{
    ChangeCache, MediaError, MediaResult, ProgressSnapshot, ScanConfig, ScanContext, ScanSummary,
    WatchBackend,
};

const ABOUT: &str = r#"
Media Watch - 媒体目录扫描与监控

使用示例:
  media_watch scan -r /path/to/media                扫描单个目录
  media_watch scan -r /videos -r /photos --async    后台并行扫描多个目录
  media_watch scan -r /media -d cache.db            使用持久化缓存，跳过未修改的文件
  media_watch scan -r /media --json                 JSON格式逐行输出结果
  media_watch watch -r /media -d cache.db           扫描后持续监控目录变化
  media_watch watch -r /media --backend poll        使用轮询方式监控（网络存储）
  media_watch reset -d cache.db                     清空缓存
"#;

/// Recursive media scanner and directory watcher
#[derive(Parser)]
#[command(name = "media_watch")]
#[command(author, version, about = ABOUT, long_about = None)]
#[command(help_template = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// 显示帮助信息
    #[arg(short = 'h', long = "help", action = clap::ArgAction::Help, global = true)]
    help: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描目录中的媒体文件
    #[command(about = "扫描目录中的媒体文件")]
    Scan {
        #[arg(short = 'r', long, required = true, help = "扫描的根目录，可多次指定")]
        roots: Vec<PathBuf>,

        #[arg(short = 'd', long, help = "缓存数据库文件路径（默认仅在内存中）")]
        db: Option<PathBuf>,

        #[arg(short = 't', long, default_value = "0", help = "并行线程数，0表示自动检测")]
        threads: usize,

        #[arg(long = "async", help = "在后台线程池中扫描，通过事件泵分发结果")]
        async_mode: bool,

        #[arg(long, help = "扫描前清空缓存")]
        reset: bool,

        #[arg(long, help = "不计算文件摘要，仅比较大小和修改时间")]
        no_digest: bool,

        #[arg(long, help = "不递归扫描子目录")]
        no_recursive: bool,

        #[arg(long, help = "递归扫描的最大深度")]
        max_depth: Option<usize>,

        #[arg(long, help = "输出JSON格式的扫描结果")]
        json: bool,

        #[arg(long, help = "向stderr输出JSON格式的进度")]
        progress: bool,
    },

    /// 扫描后持续监控目录变化
    #[command(about = "扫描后持续监控目录变化")]
    Watch {
        #[arg(short = 'r', long, required = true, help = "监控的根目录，可多次指定")]
        roots: Vec<PathBuf>,

        #[arg(short = 'd', long, help = "缓存数据库文件路径（默认仅在内存中）")]
        db: Option<PathBuf>,

        #[arg(long, default_value = "500", help = "合并事件的静默窗口（毫秒）")]
        debounce_ms: u64,

        #[arg(long, default_value = "auto", help = "监控后端: auto, native, poll")]
        backend: WatchBackend,

        #[arg(long, default_value = "1000", help = "轮询后端的扫描间隔（毫秒）")]
        poll_interval_ms: u64,

        #[arg(long, help = "监控指定秒数后退出（默认一直运行）")]
        duration: Option<u64>,

        #[arg(long, help = "输出JSON格式的结果")]
        json: bool,
    },

    /// 清空缓存数据库
    #[command(about = "清空缓存数据库")]
    Reset {
        #[arg(short = 'd', long, required = true, help = "缓存数据库文件路径")]
        db: PathBuf,
    },
}

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Some(Commands::Scan {
            roots,
            db,
            threads,
            async_mode,
            reset,
            no_digest,
            no_recursive,
            max_depth,
            json,
            progress,
        }) => {
            let mut builder = ScanConfig::builder()
                .num_threads(threads)
                .async_mode(async_mode)
                .compute_digest(!no_digest)
                .recursive(!no_recursive);
            if let Some(depth) = max_depth {
                builder = builder.max_depth(depth);
            }
            if let Some(db) = db {
                builder = builder.cache_path(db);
            }
            run_scan(builder.build(), roots, reset, json, progress)
        }
        Some(Commands::Watch {
            roots,
            db,
            debounce_ms,
            backend,
            poll_interval_ms,
            duration,
            json,
        }) => {
            let mut builder = ScanConfig::builder()
                .debounce_ms(debounce_ms)
                .watch_backend(backend)
                .poll_interval_ms(poll_interval_ms);
            if let Some(db) = db {
                builder = builder.cache_path(db);
            }
            run_watch(builder.build(), roots, duration.map(Duration::from_secs), json)
        }
        Some(Commands::Reset { db }) => run_reset(db),
        None => {
            // 没有子命令时显示帮助
            println!("{}", ABOUT);
            println!("使用 'media_watch scan -h' 查看扫描命令的详细帮助");
            println!("使用 'media_watch --help' 查看完整帮助信息");
            Ok(())
        }
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Install callbacks that print results and log errors; returns the error count
fn install_printers(ctx: &mut ScanContext, json: bool) -> Rc<RefCell<u64>> {
    ctx.set_result_callback(Some(Box::new(move |_ctx: &ScanContext, result: &MediaResult| {
        print_result(result, json)
    })));

    let errors = Rc::new(RefCell::new(0u64));
    let counter = Rc::clone(&errors);
    ctx.set_error_callback(Some(Box::new(move |_ctx: &ScanContext, err: &MediaError| {
        *counter.borrow_mut() += 1;
        warn!("{}", err);
    })));
    errors
}

fn print_result(result: &MediaResult, json: bool) {
    if json {
        match serde_json::to_string(result) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Cannot encode result for {}: {}", result.path.display(), e),
        }
    } else {
        println!(
            "{:<6} {:>12}  {}",
            result.media_type.as_str(),
            result.size,
            result.path.display()
        );
    }
}

fn run_scan(
    config: ScanConfig,
    roots: Vec<PathBuf>,
    reset: bool,
    json: bool,
    progress: bool,
) -> Result<(), MediaError> {
    info!("Starting media scan...");
    info!("Roots: {:?}", roots);
    info!("Async: {}", config.async_mode);
    info!("Digest: {}", config.compute_digest);

    let mut ctx = ScanContext::new(config);
    for root in &roots {
        ctx.add_path(root)?;
    }
    if reset {
        ctx.reset_cache();
    }
    let errors = install_printers(&mut ctx, json);
    if progress {
        ctx.set_progress_callback(Some(Box::new(|_ctx: &ScanContext, snapshot: &ProgressSnapshot| {
            snapshot.print_to_stderr()
        })));
    }

    ctx.scan()?;
    while ctx.is_scanning() || ctx.is_ready() {
        ctx.wait_ready(Duration::from_millis(100));
        ctx.pump();
    }

    let summary = ctx.summary();
    if json {
        match serde_json::to_string(&summary) {
            Ok(line) => eprintln!("{}", line),
            Err(e) => warn!("Cannot encode summary: {}", e),
        }
    } else {
        print_summary(&summary, *errors.borrow());
    }
    Ok(())
}

fn print_summary(summary: &ScanSummary, errors: u64) {
    println!("Scan completed:");
    println!("  Total files: {}", summary.total_files);
    println!("  Total dirs: {}", summary.total_dirs);
    println!("  Probed files: {}", summary.probed_files);
    println!("  Cached files: {}", summary.cached_files);
    println!("  Evicted entries: {}", summary.evicted);
    println!("  Errors: {}", errors);
    println!("  Duration: {}ms", summary.duration_ms);
}

fn run_watch(
    config: ScanConfig,
    roots: Vec<PathBuf>,
    duration: Option<Duration>,
    json: bool,
) -> Result<(), MediaError> {
    let mut ctx = ScanContext::new(config);
    install_printers(&mut ctx, json);
    for root in &roots {
        ctx.watch_directory(root)?;
    }

    ctx.scan()?;
    info!("Initial scan done, watching {} root(s)", roots.len());

    let deadline = duration.map(|d| Instant::now() + d);
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        ctx.wait_ready(Duration::from_millis(500));
        ctx.pump();
    }
    Ok(())
}

fn run_reset(db: PathBuf) -> Result<(), MediaError> {
    let cache = ChangeCache::try_open(&db)?;
    let entries = cache.len();
    cache.reset();
    info!("Removed {} entries from {}", entries, db.display());
    Ok(())
}
