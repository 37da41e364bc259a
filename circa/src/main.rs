use circa::cli;
use circa::net::TokioSocketFactory;

#[tokio::main]
async fn main() {
    let args = match cli::parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };
    let factory = Box::new(TokioSocketFactory::new(tokio::runtime::Handle::current()));
    // The prompt loop blocks on stdin; sockets are pumped by worker threads.
    let code = tokio::task::spawn_blocking(move || cli::run(args, factory))
        .await
        .unwrap_or(1);
    std::process::exit(code);
}
