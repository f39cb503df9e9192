use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("emp {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: emp");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", option_env!("EMP_BUILD_TARGET").unwrap_or("unknown"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: client={}, async={}, cli=true",
        cfg!(feature = "client"),
        cfg!(feature = "async")
    );
    println!(
        "protocol: emp header={}B max_requests={}",
        emp_frame::HEADER_SIZE,
        emp_client::MAX_REQUESTS
    );

    Ok(SUCCESS)
}
