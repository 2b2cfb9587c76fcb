const RESET: &str = "\x1b[0m";
const BANNER_COLOR: &str = "\x1b[38;5;130m";
const DIM_GRAY: &str = "\x1b[2;90m";
const BANNER: &str = r#"
 _                     _ _ _       ____  _
| |__  _   _  __ _ ___(_) | | __ _|___ \| |__  _   _ ___
| '_ \| | | |/ _` |_  / | | |/ _` | __) | '_ \| | | / __|
| |_) | |_| | (_| |/ /| | | | (_| |/ __/| |_) | |_| \__ \
|_.__/ \__,_|\__, /___|_|_|_|\__,_|_____|_.__/ \__,_|___/
             |___/                                       "#;
const APP_DESCRIPTION: &str = "Relays Bugzilla change notifications from STOMP onto the message bus.";
const LIABILITY_NOTICE: &str =
    "MIT License disclaimer: software is provided \"AS IS\", without warranty or liability.";

pub fn version_line() -> String {
    format!(
        "{} v{} | build {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("BUGZILLA2BUS_BUILD_DATE_UTC")
    )
}

pub fn print_startup_banner() {
    println!("{BANNER_COLOR}{BANNER}{RESET}");
    println!();
    println!("{}", version_line());
    println!("{APP_DESCRIPTION}");
    println!("{DIM_GRAY}{LIABILITY_NOTICE}{RESET}");
    println!();
    println!("================================================================");
    println!();
}
