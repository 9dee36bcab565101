use std::io::Read;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cf_catalog::catalog::Catalog;
use cf_catalog::config::{Config, ConfigLoader, Session};
use cf_catalog::domain::{CollectionFilters, ReplicantCheck};
use cf_catalog::error::CatalogError;
use cf_catalog::output::{JsonOutput, OutputMode, byte_format};
use cf_catalog::replicant::{ReplicantOptions, locate_replicants};
use cf_catalog::store::CatalogStore;

#[derive(Parser)]
#[command(name = "cfcat")]
#[command(about = "Metadata catalog for scientific data files across disk, remote and tape")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List collections, or the files of one collection")]
    Ls {
        #[arg(long)]
        collection: Option<String>,
    },
    #[command(about = "Find files matching a string in a collection (or anywhere)")]
    Findf {
        matching: String,
        #[arg(long)]
        collection: Option<String>,
    },
    #[command(about = "Find collections by name/description match, tag or facet")]
    Findc {
        #[arg(long)]
        matching: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"])]
        facet: Option<Vec<String>>,
    },
    #[command(about = "Organise already-known files into a collection")]
    Organise {
        collection: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(help = "Full file paths; read from stdin when omitted")]
        paths: Vec<String>,
    },
    #[command(about = "Tag a collection (or remove a tag from it)")]
    Tag {
        collection: String,
        tagname: String,
        #[arg(long)]
        remove: bool,
    },
    #[command(about = "Set or remove a facet on a collection")]
    Facet {
        collection: String,
        key: String,
        value: Option<String>,
        #[arg(long)]
        remove: bool,
    },
    #[command(about = "Link two collections with a predicate")]
    Link {
        collection_one: String,
        collection_two: String,
        predicate: String,
        #[arg(long, conflicts_with = "reverse")]
        oneway: bool,
        #[arg(long, help = "Reverse predicate for an asymmetric pair")]
        reverse: Option<String>,
    },
    #[command(about = "Show collections related by a predicate")]
    Related {
        collection: String,
        predicate: String,
    },
    #[command(about = "Delete a collection")]
    Delete {
        collection: String,
        #[arg(long)]
        force: bool,
    },
    #[command(about = "Locate probable file copies across collections")]
    Replicants {
        collection: String,
        #[arg(long)]
        strip_base: Option<String>,
        #[arg(long)]
        match_full_path: bool,
        #[arg(long, value_enum, default_value_t = ReplicantCheck::Both)]
        check: ReplicantCheck,
        #[arg(long, help = "Also report wholesale duplicate collections")]
        entire: bool,
    },
    #[command(about = "List storage locations")]
    Locations,
    #[command(about = "Create an empty catalog at the configured path")]
    Init,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CatalogError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CatalogError) -> u8 {
    match error {
        CatalogError::CollectionNotFound(_)
        | CatalogError::LocationNotFound(_)
        | CatalogError::TagNotFound(_)
        | CatalogError::VariableNotFound(_)
        | CatalogError::FileNotFound { .. }
        | CatalogError::UnknownFiles { .. } => 2,
        CatalogError::DuplicateCollection(_)
        | CatalogError::DuplicateLocation(_)
        | CatalogError::DuplicateTag(_)
        | CatalogError::DuplicateProtocol(_)
        | CatalogError::DuplicateCellMethod { .. }
        | CatalogError::DuplicateFile { .. } => 3,
        CatalogError::CollectionNotEmpty { .. }
        | CatalogError::LocationNotEmpty { .. }
        | CatalogError::FileNotInCollection { .. }
        | CatalogError::TagNotOnCollection { .. }
        | CatalogError::ReservedCollection(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let (mut config, config_path) = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    let store = CatalogStore::new(config.catalog_path().into_diagnostic()?);
    let mut catalog = store.load().into_diagnostic()?;

    match cli.command {
        Commands::Ls { collection } => {
            let session = Session::resolve(collection, &config);
            match &session.collection {
                Some(collection) => {
                    let files = catalog
                        .retrieve_files_in_collection(collection, None, false)
                        .into_diagnostic()?;
                    match output_mode {
                        OutputMode::Json => JsonOutput::print(&files).into_diagnostic()?,
                        OutputMode::Human => {
                            println!("{}", catalog.collection_info(collection).into_diagnostic()?);
                            for file in files {
                                println!("{}  {}", file.full_path(), byte_format(file.size));
                            }
                        }
                    }
                    remember_collection(&mut config, &config_path, &session)?;
                }
                None => {
                    let collections = catalog
                        .retrieve_collections(&CollectionFilters::default())
                        .into_diagnostic()?;
                    print_collections(&collections, output_mode)?;
                }
            }
        }
        Commands::Findf {
            matching,
            collection,
        } => {
            let session = Session::resolve(collection, &config);
            let files = match &session.collection {
                Some(collection) => catalog
                    .retrieve_files_in_collection(collection, Some(&matching), false)
                    .into_diagnostic()?,
                None => catalog.retrieve_files_which_match(&matching),
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print(&files).into_diagnostic()?,
                OutputMode::Human => {
                    for file in files {
                        println!("{}", file.full_path());
                    }
                }
            }
            remember_collection(&mut config, &config_path, &session)?;
        }
        Commands::Findc {
            matching,
            tag,
            facet,
        } => {
            let filters = CollectionFilters {
                contains: matching,
                tag,
                facet: facet.map(|mut pair| {
                    let value = pair.pop().unwrap_or_default();
                    let key = pair.pop().unwrap_or_default();
                    (key, value)
                }),
                ..CollectionFilters::default()
            };
            let collections = catalog.retrieve_collections(&filters).into_diagnostic()?;
            print_collections(&collections, output_mode)?;
        }
        Commands::Organise {
            collection,
            description,
            paths,
        } => {
            let paths = if paths.is_empty() {
                read_stdin_lines()?
            } else {
                paths
            };
            let attached = catalog
                .organise(&collection, &paths, description.as_deref())
                .into_diagnostic()?;
            store.save(&catalog).into_diagnostic()?;
            println!("organised {attached} files into {collection}");
        }
        Commands::Tag {
            collection,
            tagname,
            remove,
        } => {
            if remove {
                catalog
                    .remove_tag_from_collection(&tagname, &collection)
                    .into_diagnostic()?;
            } else {
                catalog.tag_collection(&collection, &tagname).into_diagnostic()?;
            }
            store.save(&catalog).into_diagnostic()?;
        }
        Commands::Facet {
            collection,
            key,
            value,
            remove,
        } => {
            if remove {
                catalog.remove_facet(&collection, &key).into_diagnostic()?;
            } else {
                let value = value.ok_or_else(|| miette::Report::msg("facet requires a value"))?;
                catalog.add_facet(&collection, &key, &value).into_diagnostic()?;
            }
            store.save(&catalog).into_diagnostic()?;
        }
        Commands::Link {
            collection_one,
            collection_two,
            predicate,
            oneway,
            reverse,
        } => {
            if oneway {
                catalog
                    .link_one_way(&collection_one, &collection_two, &predicate)
                    .into_diagnostic()?;
            } else {
                catalog
                    .link_pair(
                        &collection_one,
                        &collection_two,
                        &predicate,
                        Some(reverse.as_deref().unwrap_or(&predicate)),
                    )
                    .into_diagnostic()?;
            }
            store.save(&catalog).into_diagnostic()?;
        }
        Commands::Related {
            collection,
            predicate,
        } => {
            let related = catalog.related(&collection, &predicate).into_diagnostic()?;
            print_collections(&related, output_mode)?;
        }
        Commands::Delete { collection, force } => {
            catalog.delete_collection(&collection, force).into_diagnostic()?;
            store.save(&catalog).into_diagnostic()?;
            if config.last_collection.as_deref() == Some(collection.as_str()) {
                config.last_collection = None;
                ConfigLoader::save(&config, &config_path).into_diagnostic()?;
            }
        }
        Commands::Replicants {
            collection,
            strip_base,
            match_full_path,
            check,
            entire,
        } => {
            let options = ReplicantOptions {
                strip_base,
                match_full_path,
                check,
                match_entire_collection: entire,
                try_reverse_for_speed: false,
            };
            let report = locate_replicants(&catalog, &collection, &options).into_diagnostic()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&report).into_diagnostic()?,
                OutputMode::Human => {
                    for (index, source) in report.sources.iter().enumerate() {
                        if report.has_replicas(index) {
                            println!(
                                "{}/{} has {} possible copies",
                                source.path,
                                source.name,
                                report.matches[index].len() - 1
                            );
                        }
                    }
                    for name in &report.duplicate_collections {
                        println!("collection {name} duplicates {collection}");
                    }
                }
            }
        }
        Commands::Locations => match output_mode {
            OutputMode::Json => {
                JsonOutput::print(&catalog.retrieve_locations()).into_diagnostic()?
            }
            OutputMode::Human => {
                for location in catalog.retrieve_locations() {
                    println!("{}", catalog.location_info(&location.name).into_diagnostic()?);
                }
            }
        },
        Commands::Init => {
            if store.path().as_std_path().exists() {
                return Err(miette::Report::msg(format!(
                    "catalog already exists at {}",
                    store.path()
                )));
            }
            store.save(&Catalog::new()).into_diagnostic()?;
            ConfigLoader::save(&config, &config_path).into_diagnostic()?;
            println!("created empty catalog at {}", store.path());
        }
    }

    Ok(())
}

fn print_collections(
    collections: &[&cf_catalog::catalog::Collection],
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print(&collections).into_diagnostic()?,
        OutputMode::Human => {
            for collection in collections {
                println!(
                    "{}  {} in {} files  {}",
                    collection.name,
                    byte_format(collection.volume),
                    collection.file_count(),
                    collection.description
                );
            }
        }
    }
    Ok(())
}

fn remember_collection(
    config: &mut Config,
    config_path: &std::path::Path,
    session: &Session,
) -> miette::Result<()> {
    if let Some(collection) = &session.collection {
        if config.last_collection.as_deref() != Some(collection.as_str()) {
            config.last_collection = Some(collection.clone());
            ConfigLoader::save(config, config_path).into_diagnostic()?;
        }
    }
    Ok(())
}

fn read_stdin_lines() -> miette::Result<Vec<String>> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .into_diagnostic()?;
    Ok(buffer
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
