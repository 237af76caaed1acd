#[macro_use] extern crate log;

use clap::{App, Arg};
use pathformula::cfa::PathFile;
use pathformula::{CacheStats, CachingManager, Error, FormulaOptions, Manager, PathFormula, PathFormulaManager};
use rayon::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};


struct Output {
    dump:   bool,
    ssa:    bool,
}

impl Output {
    fn render(&self, name: &str, pf: &PathFormula) -> Result<String, Error> {
        let mut s = if self.dump {
            format!("; {}\n{}", name, pf.dump()?)
        } else {
            format!("{}: {}\n", name, pf.formula())
        };
        if self.ssa {
            s.push_str(&format!("; ssa {}\n", pf.ssa()));
        }
        Ok(s)
    }
}

fn load(path: &str) -> Result<PathFile, Error> {
    let f = File::open(Path::new(path))?;
    let file = serde_json::from_reader(BufReader::new(f))?;
    Ok(file)
}

fn manager(options: &FormulaOptions, file: &PathFile) -> Manager {
    let mut m = Manager::new(options.clone());
    m.converter_mut().register_composites(&file.composites);
    m
}

/// one path, one manager
fn translate(options: &FormulaOptions, path: &str, shutdown: &AtomicBool) -> Result<(PathFormula, Option<CacheStats>), Error> {
    let file = load(path)?;
    let m = manager(options, &file);
    if options.use_cache {
        let mut m = CachingManager::new(m);
        let pf = m.make_formula_for_path(&file.edges, Some(shutdown))?;
        Ok((pf, Some(m.stats())))
    } else {
        let mut m = m;
        let pf = m.make_formula_for_path(&file.edges, Some(shutdown))?;
        Ok((pf, None))
    }
}

fn merged<M: PathFormulaManager>(m: &mut M, files: &[(String, PathFile)]) -> Result<Option<PathFormula>, Error> {
    let mut joined : Option<PathFormula> = None;
    for (path, file) in files {
        let pf = m.make_formula_for_path(&file.edges, None)?;
        debug!("{}: {} edges, length {}", path, file.edges.len(), pf.length());
        joined = Some(match joined {
            None => pf,
            Some(prev) => m.make_or(&prev, &pf),
        });
    }
    Ok(joined)
}

fn run_merged(options: &FormulaOptions, paths: &[String], out: &Output) -> Result<(), Error> {
    let mut files = Vec::new();
    for path in paths {
        files.push((path.clone(), load(path)?));
    }
    let mut m = Manager::new(options.clone());
    for (_, file) in &files {
        m.converter_mut().register_composites(&file.composites);
    }

    let joined = if options.use_cache {
        let mut m = CachingManager::new(m);
        let joined = merged(&mut m, &files)?;
        info!("cache {}", m.stats());
        joined
    } else {
        merged(&mut m, &files)?
    };

    if let Some(pf) = joined {
        print!("{}", out.render("merged", &pf)?);
    }
    Ok(())
}

fn run_parallel(options: &FormulaOptions, paths: &[String], out: &Output, fail_fast: bool) -> bool {
    let shutdown = AtomicBool::new(false);
    let pb = Arc::new(Mutex::new(pbr::ProgressBar::on(std::io::stderr(), paths.len() as u64)));
    if let Ok(mut pb) = pb.lock() {
        pb.show_speed = false;
    }

    let results : Vec<(String, Result<String, Error>, Option<CacheStats>)> = paths.par_iter().map(|path| {
        if let Ok(mut pb) = pb.lock() {
            pb.message(&format!("translating {} ", path));
        }
        let (r, stats) = match translate(options, path, &shutdown) {
            Ok((pf, stats)) => (out.render(path, &pf), stats),
            Err(e) => (Err(e), None),
        };
        if r.is_err() && fail_fast {
            shutdown.store(true, Ordering::SeqCst);
        }
        if let Ok(mut pb) = pb.lock() {
            pb.inc();
        }
        (path.clone(), r, stats)
    }).collect();

    if let Ok(mut pb) = pb.lock() {
        pb.finish_print("done translating");
    }
    eprintln!();

    let mut total = CacheStats::default();
    let mut ok = true;
    for (path, r, stats) in results {
        match r {
            Ok(s) => print!("{}", s),
            Err(Error::Interrupted) => {
                ok = false;
                warn!("{}: skipped", path);
            }
            Err(e) => {
                ok = false;
                error!("{}: {}", path, e);
            }
        }
        if let Some(s) = stats {
            total.and_hits   += s.and_hits;
            total.and_misses += s.and_misses;
            total.or_hits    += s.or_hits;
            total.or_misses  += s.or_misses;
        }
    }
    if options.use_cache {
        info!("cache {}", total);
    }
    ok
}

fn main() {
    let matches = App::new("pathformula")
        .version(clap::crate_version!())
        .about("SSA path formulas for C control flow paths")
        .arg(Arg::with_name("config")
            .long("config")
            .value_name("FILE")
            .help("formula options in toml")
            .takes_value(true))
        .arg(Arg::with_name("dump")
            .long("dump")
            .help("print SMT-LIB scripts instead of terms"))
        .arg(Arg::with_name("ssa")
            .long("ssa")
            .help("print the final SSA map of each formula"))
        .arg(Arg::with_name("merge")
            .long("merge")
            .help("join all paths into one formula"))
        .arg(Arg::with_name("no-cache")
            .long("no-cache")
            .help("do not memoize translations"))
        .arg(Arg::with_name("fail-fast")
            .long("fail-fast")
            .help("stop all workers on the first error"))
        .arg(Arg::with_name("PATH")
            .help("json files with one path each")
            .required(true)
            .multiple(true))
        .get_matches();

    pathformula::init_logging();

    let mut options = match matches.value_of("config") {
        Some(path) => match FormulaOptions::load(Path::new(path)) {
            Ok(o) => o,
            Err(e) => {
                error!("{}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => FormulaOptions::default(),
    };
    if matches.is_present("no-cache") {
        options.use_cache = false;
    }

    let out = Output {
        dump:   matches.is_present("dump"),
        ssa:    matches.is_present("ssa"),
    };
    let paths : Vec<String> = matches.values_of("PATH")
        .map(|v|v.map(String::from).collect())
        .unwrap_or_default();

    let ok = if matches.is_present("merge") {
        match run_merged(&options, &paths, &out) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    } else {
        run_parallel(&options, &paths, &out, matches.is_present("fail-fast"))
    };

    if !ok {
        std::process::exit(1);
    }
}
