#[tokio::main]
async fn main() {
    if let Err(e) = waste_lense::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
