#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    document_generator::run().await
}
