use std::fs;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let openapi = vmgate::handlers::ApiDoc::openapi();
    let yaml = serde_yaml::to_string(&openapi)?;

    let output_path = "openapi.yaml";
    fs::write(output_path, yaml)?;

    println!("OpenAPI spec written to {}", output_path);

    Ok(())
}
