use std::{
    fs,
    io::{stdout, Write},
    process,
};

use clap::{App, Arg, ArgMatches};
use log::LevelFilter;
use serde::Serialize;
use strata_data_access::{CreationReason, Instance, NewInstance, ResolveLimits, Workspace};
use strata_layout::Schema;

type Error = Box<dyn std::error::Error>;
type Result<T> = std::result::Result<T, Error>;

pub fn main() {
    env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .init();

    let matches = App::new("strata_dump")
        .about("Resolves struct instances in a binary file and prints their fields")
        .after_help(
            "
Offsets and counts accept decimal or 0x-prefixed hex.
Set RUST_LOG=debug to trace instance creation.
"
            .trim(),
        )
        .arg(
            Arg::with_name("schema")
                .long("schema")
                .value_name("FILE")
                .help("path to the JSON struct definitions")
                .required(true),
        )
        .arg(
            Arg::with_name("file")
                .long("file")
                .value_name("FILE")
                .help("path to the binary file to read")
                .required(true),
        )
        .arg(
            Arg::with_name("struct")
                .long("struct")
                .value_name("NAME")
                .help("struct definition to place at --offset")
                .required(true),
        )
        .arg(
            Arg::with_name("offset")
                .long("offset")
                .value_name("OFFSET")
                .help("file offset of the first instance")
                .default_value("0"),
        )
        .arg(
            Arg::with_name("count")
                .long("count")
                .value_name("N")
                .help("number of consecutive instances to place")
                .default_value("1"),
        )
        .arg(
            Arg::with_name("expand")
                .long("expand")
                .help("create every reachable child and sequential instance"),
        )
        .arg(
            Arg::with_name("eval")
                .long("eval")
                .value_name("EXPR")
                .help("expression to evaluate on each printed instance")
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("max-depth")
                .long("max-depth")
                .value_name("N")
                .help("maximum nesting of struct resolution"),
        )
        .arg(
            Arg::with_name("limits")
                .long("limits")
                .value_name("FILE")
                .help("path to a JSON file with resolution limits"),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("print a JSON report instead of text"),
        )
        .get_matches();

    run(&matches).unwrap_or_else(|error| {
        eprintln!("Error: {}", error);
        process::exit(1);
    });
}

fn parse_int(text: &str) -> Result<i64> {
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16)?,
        None => text.parse()?,
    };
    Ok(value)
}

fn load_limits(matches: &ArgMatches) -> Result<ResolveLimits> {
    let mut limits = match matches.value_of("limits") {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => ResolveLimits::default(),
    };
    if let Some(depth) = matches.value_of("max-depth") {
        limits.max_depth = depth.parse()?;
    }
    Ok(limits)
}

fn run(matches: &ArgMatches) -> Result<()> {
    let schema_path = matches.value_of("schema").unwrap_or_default();
    let schema = Schema::load(schema_path)?;
    for problem in schema.check() {
        log::warn!("{}: {}", schema_path, problem);
    }

    let mut ws = Workspace::with_limits(schema, load_limits(matches)?);
    let file = ws.open_file(matches.value_of("file").unwrap_or_default())?;

    let struct_name = matches.value_of("struct").unwrap_or_default();
    ws.schema().struct_def(struct_name)?;
    let offset = parse_int(matches.value_of("offset").unwrap_or("0"))?;
    let count = parse_int(matches.value_of("count").unwrap_or("1"))?;

    let mut current = Some(ws.add_instance(
        NewInstance::new(struct_name, file, offset, CreationReason::UserDefined)
            .with_remaining_count(count, false),
    ));
    while let Some(inst) = current {
        current = inst.create_next_instance(CreationReason::ManualExpand);
    }
    if matches.is_present("expand") {
        let created = ws.expand_all(Some(file));
        eprintln!("Expanded {} instances", created);
    }

    let exprs: Vec<&str> = matches.values_of("eval").map_or_else(Vec::new, Iterator::collect);
    let reports: Vec<InstanceReport> = ws
        .instances()
        .iter()
        .map(|inst| InstanceReport::new(inst, &exprs))
        .collect();

    let stdout = stdout();
    let mut out = stdout.lock();
    if matches.is_present("json") {
        serde_json::to_writer_pretty(&mut out, &reports)?;
        writeln!(out)?;
    } else {
        for report in &reports {
            report.write_text(&mut out)?;
        }
    }

    if ws.limit_hits() > 0 {
        eprintln!("Resolution limits were hit {} times", ws.limit_hits());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct InstanceReport {
    id: i64,
    def_name: String,
    offset: i64,
    size: Option<i64>,
    reason: String,
    fields: Vec<String>,
    next: String,
    eval: Vec<(String, i64)>,
}

impl InstanceReport {
    fn new(inst: &Instance<'_>, exprs: &[&str]) -> Self {
        Self {
            id: inst.id(),
            def_name: inst.def_name().to_string(),
            offset: inst.offset(),
            size: inst.size(false),
            reason: inst.reason().to_string(),
            fields: (0..inst.field_count())
                .map(|i| {
                    inst.field_offset(i, false);
                    inst.field_summary(i)
                })
                .collect(),
            next: inst.next_instance_info(false),
            eval: exprs
                .iter()
                .map(|expr| (expr.to_string(), inst.evaluate(expr)))
                .collect(),
        }
    }

    fn write_text(&self, out: &mut impl Write) -> Result<()> {
        let size = self
            .size
            .map_or_else(|| "?".to_string(), |size| size.to_string());
        writeln!(
            out,
            "#{} {} @{} size {} ({})",
            self.id, self.def_name, self.offset, size, self.reason
        )?;
        for field in &self.fields {
            writeln!(out, "  {}", field)?;
        }
        writeln!(out, "  next: {}", self.next)?;
        for (expr, value) in &self.eval {
            writeln!(out, "  {} = {}", expr, value)?;
        }
        Ok(())
    }
}
