use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use gemmlike_conv::{conv_output_shape, ConvParam, GemmLikeConv, Precision, QuantParams};
use gemmlike_core::{ConvGeometry, DType, GemmlikeError, Shape, Tensor, TensorData};
use gemmlike_kernels::{ExecContext, PowerMode, SimdCapability};

#[derive(Parser)]
#[command(
    name = "gemmlike",
    about = "GEMM-like convolution dispatch: capability info and benchmarks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show SIMD capabilities and available precisions
    Info,
    /// Benchmark convolution cases
    Bench {
        /// fp32, int8-fp32, int8-int8 or fp16
        #[arg(long, default_value = "fp32")]
        precision: Precision,
        /// Timed launches per case
        #[arg(long, default_value = "10")]
        iters: usize,
        /// Untimed launches per case before timing
        #[arg(long, default_value = "1")]
        warmup: usize,
        /// Worker threads for the execution context
        #[arg(long, default_value = "1")]
        threads: usize,
        /// JSON file with a list of cases (fields n, h, w, g, gcout, gcin, kh, kw, pu, pd, pl, pr, sh, sw, dh, dw)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the input height and width of every case
        #[arg(long)]
        hw: Option<usize>,
        /// RNG seed for the random operands
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

/// One convolution shape, in the column order of the benchmark tables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BenchCase {
    n: usize,
    h: usize,
    w: usize,
    g: usize,
    gcout: usize,
    gcin: usize,
    kh: usize,
    kw: usize,
    pu: usize,
    pd: usize,
    pl: usize,
    pr: usize,
    sh: usize,
    sw: usize,
    dh: usize,
    dw: usize,
}

impl From<[usize; 16]> for BenchCase {
    fn from(a: [usize; 16]) -> Self {
        let [n, h, w, g, gcout, gcin, kh, kw, pu, pd, pl, pr, sh, sw, dh, dw] = a;
        Self { n, h, w, g, gcout, gcin, kh, kw, pu, pd, pl, pr, sh, sw, dh, dw }
    }
}

impl BenchCase {
    fn geometry(&self) -> ConvGeometry {
        ConvGeometry {
            kernel_h: self.kh,
            kernel_w: self.kw,
            stride_h: self.sh,
            stride_w: self.sw,
            pad_top: self.pu,
            pad_bottom: self.pd,
            pad_left: self.pl,
            pad_right: self.pr,
            dilation_h: self.dh,
            dilation_w: self.dw,
            groups: self.g,
        }
    }

    fn input_shape(&self) -> Shape {
        Shape::nchw(self.n, self.g * self.gcin, self.h, self.w)
    }

    fn filter_dims(&self) -> [usize; 4] {
        [self.g * self.gcout, self.gcin, self.kh, self.kw]
    }

    fn label(&self) -> String {
        format!(
            "{}x{}x{}x{} g{} {}->{} k{}x{} s{}x{}",
            self.n,
            self.g * self.gcin,
            self.h,
            self.w,
            self.g,
            self.gcin,
            self.gcout,
            self.kh,
            self.kw,
            self.sh,
            self.sw
        )
    }
}

/*                N    H    W   G GCout GCin KH KW PU PD PL PR SH SW DH DW */
const DEFAULT_CASES: [[usize; 16]; 9] = [
    // depthwise
    [1, 224, 224, 16, 1, 1, 5, 5, 1, 1, 1, 1, 1, 1, 1, 1],
    [1, 224, 224, 16, 1, 1, 5, 5, 1, 1, 1, 1, 1, 2, 1, 1],
    [1, 224, 224, 16, 1, 1, 3, 3, 1, 1, 1, 1, 1, 1, 1, 1],
    [1, 224, 224, 16, 1, 1, 3, 3, 1, 1, 1, 1, 3, 3, 1, 1],
    // stride 2
    [1, 224, 224, 1, 16, 32, 3, 3, 1, 1, 1, 1, 2, 2, 1, 1],
    [1, 224, 224, 1, 166, 512, 3, 3, 1, 1, 1, 1, 2, 2, 1, 1],
    // stride 1
    [1, 224, 224, 1, 8, 32, 3, 3, 1, 1, 1, 1, 1, 1, 1, 1],
    [1, 224, 224, 1, 16, 32, 3, 3, 1, 1, 1, 1, 1, 1, 1, 1],
    [1, 224, 224, 2, 16, 32, 3, 3, 1, 1, 1, 1, 3, 3, 1, 1],
];

#[derive(Debug, Serialize)]
struct CaseResult {
    case: BenchCase,
    precision: Precision,
    algorithm: String,
    kernel: String,
    ms_per_iter: f64,
    gops: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info => {
            cmd_info();
            Ok(())
        }
        Commands::Bench { precision, iters, warmup, threads, config, hw, seed, json } => {
            cmd_bench(BenchArgs { precision, iters, warmup, threads, config, hw, seed, json })
        }
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn cmd_info() {
    println!("gemmlike v{}\n", env!("CARGO_PKG_VERSION"));

    println!("Platform");
    println!("  OS:   {}", std::env::consts::OS);
    println!("  Arch: {}", std::env::consts::ARCH);

    let simd = SimdCapability::detect();
    println!("\nSIMD (tier: {})", simd.best_tier());
    println!("  AVX2:      {}", if simd.avx2 { "[x]" } else { "[ ]" });
    println!("  AVX-512:   {}", if simd.avx512f { "[x]" } else { "[ ]" });
    println!("  FMA:       {}", if simd.fma { "[x]" } else { "[ ]" });
    println!("  F16C:      {}", if simd.f16c { "[x]" } else { "[ ]" });
    println!("  NEON:      {}", if simd.neon { "[x]" } else { "[ ]" });
    println!("  NEON fp16: {}", if simd.neon_fp16 { "[x]" } else { "[ ]" });

    println!("\nPrecisions");
    for p in Precision::ALL {
        let mark = if p.is_available() { "[x]" } else { "[ ]" };
        println!("  {:<10} {}  in={} out={}", p.to_string(), mark, p.input_dtype(), p.output_dtype());
    }
}

struct BenchArgs {
    precision: Precision,
    iters: usize,
    warmup: usize,
    threads: usize,
    config: Option<PathBuf>,
    hw: Option<usize>,
    seed: u64,
    json: bool,
}

fn cmd_bench(args: BenchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut cases: Vec<BenchCase> = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => DEFAULT_CASES.iter().map(|&a| BenchCase::from(a)).collect(),
    };
    if let Some(hw) = args.hw {
        for c in &mut cases {
            c.h = hw;
            c.w = hw;
        }
    }

    let mut ctx = ExecContext::new();
    ctx.set_run_mode(PowerMode::High, args.threads)?;
    let mut rng = StdRng::seed_from_u64(args.seed);
    let iters = args.iters.max(1);

    if !args.json {
        let simd = SimdCapability::detect();
        println!("=== gemmlike conv benchmark ({}) ===", args.precision);
        println!("SIMD: {}  threads: {}\n", simd.best_tier(), ctx.threads());
        println!(
            "{:<36} {:>12} {:>24} {:>11} {:>9}",
            "Case", "Algorithm", "Kernel", "ms/iter", "GOPS"
        );
        println!("{}", "-".repeat(96));
    }

    let mut results = Vec::with_capacity(cases.len());
    for case in &cases {
        let r = bench_case(case, args.precision, iters, args.warmup, &mut ctx, &mut rng)?;
        if !args.json {
            println!(
                "{:<36} {:>12} {:>24} {:>11.3} {:>9.2}",
                case.label(),
                r.algorithm,
                r.kernel,
                r.ms_per_iter,
                r.gops
            );
        }
        results.push(r);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    Ok(())
}

fn bench_case(
    case: &BenchCase,
    precision: Precision,
    iters: usize,
    warmup: usize,
    ctx: &mut ExecContext,
    rng: &mut StdRng,
) -> Result<CaseResult, GemmlikeError> {
    let geom = case.geometry();
    let fd = case.filter_dims();
    let input_shape = case.input_shape();

    let filter = random_tensor(precision.input_dtype(), &fd, rng)?;
    let bias = random_tensor(precision.bias_dtype(), &[fd[0]], rng)?;
    let mut param = ConvParam::new(filter, geom).with_bias(bias);
    if precision.is_quantized() {
        param = param.with_quant(QuantParams::per_tensor(0.05, 0.5, 0.01));
    }
    let mut conv = GemmLikeConv::new(precision, param)?;

    let input = random_tensor(precision.input_dtype(), input_shape.dims(), rng)?;
    let out_shape = conv_output_shape(&input_shape, conv.param())?;
    let mut output = Tensor::zeros(out_shape.dims(), precision.output_dtype());

    conv.prepare_for_run(&input_shape, ctx)?;
    for _ in 0..warmup {
        conv.run(&input, &mut output, ctx)?;
    }
    let start = Instant::now();
    for _ in 0..iters {
        conv.launch(&input, &mut output, ctx)?;
    }
    let secs = start.elapsed().as_secs_f64() / iters as f64;

    let [_, _, oh, ow] = out_shape.as_nchw()?;
    let ops = 2.0
        * (case.n * case.g * case.gcout * oh * ow * case.gcin * case.kh * case.kw) as f64;
    tracing::debug!(case = %case.label(), secs, "case done");

    Ok(CaseResult {
        case: *case,
        precision,
        algorithm: conv.state().algorithm().map(|a| a.to_string()).unwrap_or_default(),
        kernel: conv.kernel_func_name().unwrap_or("-").to_string(),
        ms_per_iter: secs * 1e3,
        gops: ops / secs / 1e9,
    })
}

/// Uniform integers in `[-10, 10]` stored as `dtype`.
fn random_tensor(dtype: DType, dims: &[usize], rng: &mut StdRng) -> Result<Tensor, GemmlikeError> {
    let n: usize = dims.iter().product();
    let ints: Vec<i8> = (0..n).map(|_| rng.gen_range(-10..=10)).collect();
    let data = match dtype {
        DType::F32 => TensorData::F32(ints.iter().map(|&v| v as f32).collect()),
        DType::F16 => TensorData::F16(ints.iter().map(|&v| half::f16::from_f32(v as f32)).collect()),
        DType::I8 => TensorData::I8(ints),
    };
    Tensor::from_data(data, dims)
}
