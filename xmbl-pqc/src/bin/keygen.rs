use std::env;
use xmbl_pqc::{save_keypair, SignatureAlgorithm};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_file = env::args().nth(1).unwrap_or_else(|| "xmbl_keys.json".to_string());

    let keypair = xmbl_pqc::load_or_generate(&output_file, SignatureAlgorithm::Dilithium5)?;
    save_keypair(&output_file, &keypair)?;

    println!("address: {}", xmbl_pqc::derive_address(&keypair.public_key));
    println!("keys written to: {output_file}");
    Ok(())
}
