use clap::{Parser, Subcommand};
use rrc_lib::persistence::to_json;
use rrc_lib::state_range;
use rrc_lib::{
    analyze_trace, read_pcap, AnalysisFilter, PacketAnalyzerResult, Profile, ProfileType, RrcAggregate, RrcError,
    TimeRange,
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Log debug output unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/**
 * Available CLI commands
 */
#[derive(Subcommand)]
enum Commands {
    /// Reconstruct RRC states, bursts and energy for a pcap capture
    Analyze {
        /// pcap input file
        #[arg(short = 'f', long, value_name = "FILE")]
        pcap_file: PathBuf,

        #[command(flatten)]
        profile: ProfileArgs,

        /// Address of the device, inferred from the first packet if absent
        #[arg(short, long)]
        device_ip: Option<IpAddr>,

        /// Only analyze packets at or after this time (s)
        #[arg(long, requires = "end")]
        begin: Option<f64>,

        /// Only analyze packets at or before this time (s)
        #[arg(long, requires = "begin")]
        end: Option<f64>,

        /// Directory for the parquet outputs
        #[arg(short, long, value_name = "OUTDIR")]
        out_dir: Option<PathBuf>,

        /// JSON output file with the complete result
        #[arg(short, long, value_name = "JSONFILE")]
        json: Option<PathBuf>,
    },
    /// Print or write the default profile of a network type
    Profile {
        /// 3G, LTE or WIFI
        #[arg(short, long, value_parser = parse_network, default_value = "LTE")]
        network: ProfileType,

        /// Write the profile here instead of printing it
        #[arg(short, long, value_name = "OUTFILE")]
        out_file: Option<PathBuf>,
    },
    /// Print the RRC state ranges of a pcap capture
    Ranges {
        /// pcap input file
        #[arg(short = 'f', long, value_name = "FILE")]
        pcap_file: PathBuf,

        #[command(flatten)]
        profile: ProfileArgs,

        /// Address of the device, inferred from the first packet if absent
        #[arg(short, long)]
        device_ip: Option<IpAddr>,
    },
}

#[derive(clap::Args)]
struct ProfileArgs {
    /// Profile properties file
    #[arg(short, long, value_name = "PROFILE", conflicts_with = "network")]
    profile_file: Option<PathBuf>,

    /// Use the default profile of this network type (3G, LTE or WIFI)
    #[arg(short, long, value_parser = parse_network)]
    network: Option<ProfileType>,
}

impl ProfileArgs {
    fn load(&self) -> Result<Option<Profile>, RrcError> {
        match (&self.profile_file, self.network) {
            (Some(path), _) => Profile::load(path).map(Some),
            (None, Some(network)) => Ok(Some(Profile::default_for(network))),
            (None, None) => Ok(None),
        }
    }
}

fn parse_network(raw: &str) -> Result<ProfileType, String> {
    ProfileType::parse(raw).map_err(|e| e.to_string())
}

fn print_summary(result: &PacketAnalyzerResult) {
    let machine = &result.state_machine;
    let bursts = &result.burst_collection;
    println!("Profile:            {} ({})", result.profile.name, result.profile.profile_type().as_str());
    println!("Packets:            {}", result.statistic.total_packets);
    println!("Bytes:              {}", result.statistic.total_bytes);
    println!("Trace duration:     {:.3} s", machine.trace_duration());
    println!("RRC energy:         {:.3} J", machine.total_rrc_energy());
    println!("Joules per KB:      {:.4}", machine.joules_per_kilobyte());
    println!("Total energy:       {:.3} J", result.energy_model.total_energy());
    println!("Bursts:             {} ({} long)", bursts.bursts.len(), bursts.long_burst_count);
    for info in &bursts.category_info {
        let jpkb = info.jpkb.map_or("-".to_string(), |v| format!("{v:.4}"));
        println!(
            "  {:<17} payload {:>10} B ({:5.1}%)  energy {:8.3} J ({:5.1}%)  jpkb {}",
            info.category.name(),
            info.payload,
            info.payload_pct,
            info.energy,
            info.energy_pct,
            jpkb
        );
    }
}

fn analyze(
    pcap_file: &Path,
    profile: Option<Profile>,
    device_ip: Option<IpAddr>,
    time_range: Option<TimeRange>,
    out_dir: Option<&Path>,
    json: Option<&Path>,
) -> Result<(), RrcError> {
    let trace = read_pcap(pcap_file, device_ip)?;
    let filter = AnalysisFilter {
        time_range,
        ..Default::default()
    };
    let result = analyze_trace(&trace, profile.as_ref(), &filter);
    print_summary(&result);

    if let Some(dir) = out_dir {
        for path in result.to_parquet(dir)? {
            info!("wrote {}", path.display());
        }
    }
    if let Some(path) = json {
        to_json(&result, path)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn run(command: Commands) -> Result<(), RrcError> {
    match command {
        Commands::Analyze {
            pcap_file,
            profile,
            device_ip,
            begin,
            end,
            out_dir,
            json,
        } => {
            let time_range = begin.zip(end).map(|(b, e)| TimeRange::new(b, e));
            analyze(
                &pcap_file,
                profile.load()?,
                device_ip,
                time_range,
                out_dir.as_deref(),
                json.as_deref(),
            )
        }
        Commands::Profile { network, out_file } => {
            let profile = Profile::default_for(network);
            match out_file {
                Some(path) => profile.save(&path),
                None => {
                    print!("{}", profile.to_properties());
                    Ok(())
                }
            }
        }
        Commands::Ranges {
            pcap_file,
            profile,
            device_ip,
        } => {
            let profile = profile.load()?.unwrap_or_else(Profile::default_lte);
            let trace = read_pcap(&pcap_file, device_ip)?;
            for range in state_range::create(&trace.packets, &profile, trace.trace_duration) {
                println!(
                    "{:>12.6} {:>12.6} {}",
                    range.begin_time,
                    range.end_time,
                    range.state.name()
                );
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command else {
        return ExitCode::SUCCESS;
    };
    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
