use prompt_gallery::{
    config::GalleryConfig,
    database::Database,
    metadata::extract_record,
    scanner::{read_image_info, scan_library},
    similarity::rank_similar,
    worker::spawn_refresh,
};
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

fn usage() {
    println!("Local prompt gallery scanner and inspector.");
    println!();
    println!("Usage:");
    println!("  prompt-gallery scan [folder]     sync the library and refresh the metadata cache");
    println!("  prompt-gallery show <image>      print the extracted generation record");
    println!("  prompt-gallery similar <image>   rank cached images by shared prompt tags");
}

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        usage();
        std::process::exit(1);
    };

    let result = match command.as_str() {
        "--help" | "-h" => {
            usage();
            Ok(())
        }
        "scan" => run_scan(args.next().map(PathBuf::from)),
        "show" => match args.next() {
            Some(image) => run_show(Path::new(&image)),
            None => Err("Missing image path after 'show'".to_string()),
        },
        "similar" => match args.next() {
            Some(image) => run_similar(&image),
            None => Err("Missing image path after 'similar'".to_string()),
        },
        unknown => Err(format!("Unknown command: {}", unknown)),
    };

    if let Err(error) = result {
        eprintln!("{}", error);
        std::process::exit(1);
    }
}

fn open_database(config: &GalleryConfig) -> Result<Database, String> {
    Database::new(Path::new(&config.database_file))
        .map_err(|error| format!("Failed to open {}: {}", config.database_file, error))
}

fn run_scan(folder_override: Option<PathBuf>) -> Result<(), String> {
    let config = GalleryConfig::load(Path::new(CONFIG_FILE));
    let folder = folder_override.unwrap_or_else(|| PathBuf::from(&config.image_folder));
    if !folder.is_dir() {
        return Err(format!("Not a directory: {}", folder.display()));
    }

    let db = open_database(&config)?;
    let images = scan_library(&folder);
    let paths: Vec<String> = images
        .iter()
        .map(|image| image.path.to_string_lossy().to_string())
        .collect();
    db.sync_files(&paths)
        .map_err(|error| format!("Library sync failed: {}", error))?;
    println!("Synced {} images from {}", images.len(), folder.display());

    let stats = spawn_refresh(db, images).join();
    println!(
        "Cache refresh: {} examined, {} refreshed, {} failed",
        stats.examined, stats.refreshed, stats.failed
    );
    Ok(())
}

fn run_show(image: &Path) -> Result<(), String> {
    let info = read_image_info(image)
        .map_err(|error| format!("Failed to read {}: {}", image.display(), error))?;
    let record = extract_record(&info);

    println!("Prompt:\n{}", record.prompt);
    println!();
    println!("Negative prompt:\n{}", record.negative_prompt);
    println!();
    println!("Other parameters:\n{}", record.other_parameters);
    if let Some(workflow) = info.get("workflow") {
        println!();
        println!("Raw workflow:\n{}", workflow);
    }
    Ok(())
}

fn run_similar(image: &str) -> Result<(), String> {
    let config = GalleryConfig::load(Path::new(CONFIG_FILE));
    let db = open_database(&config)?;

    let (source_prompt, _) = db
        .cached_prompts(image)
        .map_err(|error| format!("Cache read failed: {}", error))?;
    if source_prompt.is_empty() {
        return Err(format!("No cached prompt for {}", image));
    }

    let paths = db
        .list_all_image_paths()
        .map_err(|error| format!("Cache read failed: {}", error))?;
    let mut prompts = Vec::with_capacity(paths.len());
    for path in &paths {
        let (prompt, _) = db
            .cached_prompts(path)
            .map_err(|error| format!("Cache read failed: {}", error))?;
        prompts.push(prompt);
    }

    let candidates = paths
        .iter()
        .map(String::as_str)
        .zip(prompts.iter().map(String::as_str));
    let hits = rank_similar(image, &source_prompt, candidates);
    if hits.is_empty() {
        println!("No similar images found.");
        return Ok(());
    }

    for hit in hits {
        println!("{:>4}  {}", hit.score, hit.path);
    }
    Ok(())
}
