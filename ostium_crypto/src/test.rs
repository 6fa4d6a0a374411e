use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    error::ErrorStack,
    hash::MessageDigest,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    x509::{X509NameBuilder, X509},
};

use crate::ClientAssertionCertificate;

pub fn self_signed(key: &PKey<Private>) -> Result<X509, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", "ostium test")?;
    let name = name.build();

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(key)?;
    let serial = BigNum::from_u32(1)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(1)?)?;
    builder.sign(key, MessageDigest::sha256())?;

    Ok(builder.build())
}

pub fn pkcs12_certificate(
    key: &PKey<Private>,
    password: &str,
) -> Result<ClientAssertionCertificate, ErrorStack> {
    let cert = self_signed(key)?;

    let mut builder = Pkcs12::builder();
    builder.name("ostium").pkey(key).cert(&cert);
    let bundle = builder.build2(password)?;

    Ok(ClientAssertionCertificate::new(bundle.to_der()?, password))
}
