//! Chain-independent attachment rules.

use mvsd_consensus::constants::{
    ASSET_DECIMAL_MAX, ASSET_SYMBOL_MAX_LEN, ATTACHMENT_TEXT_MAX_LEN, DID_SYMBOL_MAX_LEN,
    DID_SYMBOL_MIN_LEN, MIT_SYMBOL_MAX_LEN, SECONDARY_ISSUE_FREE_THRESHOLD,
    SECONDARY_ISSUE_MAX_PERCENT,
};
use mvsd_consensus::{MstSchedule, Network};
use mvsd_primitives::address::PaymentAddress;
use mvsd_primitives::attachment::{AssetCert, AssetDetail, Attachment, CertType};
use mvsd_primitives::transaction::TxOut;

pub fn is_valid_asset_symbol(symbol: &str) -> bool {
    (1..=ASSET_SYMBOL_MAX_LEN).contains(&symbol.len())
        && symbol
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'.')
        && !symbol.starts_with('.')
        && !symbol.ends_with('.')
}

pub fn is_valid_did_symbol(symbol: &str) -> bool {
    (DID_SYMBOL_MIN_LEN..=DID_SYMBOL_MAX_LEN).contains(&symbol.len())
        && symbol
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'@' | b'_' | b'-'))
}

pub fn is_valid_mit_symbol(symbol: &str) -> bool {
    (1..=MIT_SYMBOL_MAX_LEN).contains(&symbol.len()) && symbol.bytes().all(|b| b.is_ascii_graphic())
}

/// `0` forbids secondary issues, `1..=100` is a percentage, `127` is unrestricted.
pub fn is_valid_secondary_threshold(threshold: u8) -> bool {
    threshold <= SECONDARY_ISSUE_MAX_PERCENT || threshold == SECONDARY_ISSUE_FREE_THRESHOLD
}

/// Whether an issuer holding `held` of `supply` may mint more.
pub fn secondary_issue_allowed(threshold: u8, held: u64, supply: u64) -> bool {
    match threshold {
        0 => false,
        SECONDARY_ISSUE_FREE_THRESHOLD => true,
        percent if percent <= SECONDARY_ISSUE_MAX_PERCENT => {
            (held as u128) * 100 >= (supply as u128) * percent as u128
        }
        _ => false,
    }
}

/// Parsed vesting model. `LQ` units unlock over `LP` blocks in `UN` steps.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttenuationModel {
    pub model_type: u8,
    pub locked_quantity: u64,
    pub locked_period: u64,
    pub unlock_number: u64,
    pub unlock_cycles: Vec<u64>,
    pub unlock_quantities: Vec<u64>,
}

impl AttenuationModel {
    pub fn parse(model: &str) -> Result<Self, &'static str> {
        let mut parsed = Self::default();
        let mut seen_type = false;
        for part in model.split(';').filter(|part| !part.trim().is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or("attenuation model entry without '='")?;
            let value = value.trim();
            match key.trim() {
                "PN" | "LH" | "IR" => {
                    value
                        .parse::<u64>()
                        .map_err(|_| "attenuation model value is not a number")?;
                }
                "TYPE" => {
                    parsed.model_type = value.parse().map_err(|_| "attenuation model type")?;
                    seen_type = true;
                }
                "LQ" => parsed.locked_quantity = parse_number(value)?,
                "LP" => parsed.locked_period = parse_number(value)?,
                "UN" => parsed.unlock_number = parse_number(value)?,
                "UC" => parsed.unlock_cycles = parse_list(value)?,
                "UQ" => parsed.unlock_quantities = parse_list(value)?,
                _ => return Err("unknown attenuation model key"),
            }
        }
        if !seen_type || !matches!(parsed.model_type, 1 | 2) {
            return Err("attenuation model type must be 1 or 2");
        }
        if parsed.locked_quantity == 0 || parsed.locked_period == 0 {
            return Err("attenuation model needs positive LQ and LP");
        }
        if parsed.unlock_number == 0 || parsed.unlock_number > parsed.locked_period {
            return Err("attenuation model UN out of range");
        }
        if parsed.model_type == 2 {
            let steps = parsed.unlock_number as usize;
            if parsed.unlock_cycles.len() != steps || parsed.unlock_quantities.len() != steps {
                return Err("custom attenuation model needs UN cycles and quantities");
            }
            let period: u128 = parsed.unlock_cycles.iter().map(|v| *v as u128).sum();
            let quantity: u128 = parsed.unlock_quantities.iter().map(|v| *v as u128).sum();
            if period != parsed.locked_period as u128 || quantity != parsed.locked_quantity as u128
            {
                return Err("custom attenuation model sums do not match LP/LQ");
            }
        }
        Ok(parsed)
    }
}

fn parse_number(value: &str) -> Result<u64, &'static str> {
    value
        .parse()
        .map_err(|_| "attenuation model value is not a number")
}

fn parse_list(value: &str) -> Result<Vec<u64>, &'static str> {
    value.split(',').map(|item| parse_number(item.trim())).collect()
}

fn check_asset_detail(detail: &AssetDetail, network: Network) -> Result<(), &'static str> {
    if !is_valid_asset_symbol(&detail.symbol) {
        return Err("invalid asset symbol");
    }
    if detail.decimal_number > ASSET_DECIMAL_MAX {
        return Err("asset decimal number too large");
    }
    if !is_valid_secondary_threshold(detail.secondary_issue_threshold) {
        return Err("invalid secondary issue threshold");
    }
    if detail.description.len() > ATTACHMENT_TEXT_MAX_LEN {
        return Err("asset description too long");
    }
    if detail.maximum_supply == 0 {
        return Err("asset supply must be positive");
    }
    if !detail.issuer.is_empty() && !is_valid_did_symbol(&detail.issuer) {
        return Err("invalid asset issuer");
    }
    if !detail.address.is_empty() && PaymentAddress::parse(&detail.address, network).is_err() {
        return Err("invalid asset address");
    }
    if !detail.attenuation_model.is_empty() {
        let model = AttenuationModel::parse(&detail.attenuation_model)?;
        if model.locked_quantity > detail.maximum_supply {
            return Err("attenuation model locks more than the issued quantity");
        }
    }
    Ok(())
}

fn check_cert(cert: &AssetCert, network: Network) -> Result<(), &'static str> {
    if !is_valid_asset_symbol(&cert.symbol) {
        return Err("invalid certificate symbol");
    }
    if !is_valid_did_symbol(&cert.owner) {
        return Err("invalid certificate owner");
    }
    if PaymentAddress::parse(&cert.address, network).is_err() {
        return Err("invalid certificate address");
    }
    if cert.content.len() > ATTACHMENT_TEXT_MAX_LEN {
        return Err("certificate content too long");
    }
    if cert.cert_type == CertType::Domain && cert.symbol.contains('.') {
        return Err("domain certificate symbol must not contain '.'");
    }
    if cert.cert_type == CertType::Naming && !cert.symbol.contains('.') {
        return Err("naming certificate symbol needs a domain");
    }
    if cert.cert_type == CertType::Mining && MstSchedule::parse(&cert.content).is_none() {
        return Err("mining certificate content is not a subsidy schedule");
    }
    Ok(())
}

/// Self-consistency of one output, independent of chain state.
pub fn check_output_attachment(output: &TxOut, network: Network) -> Result<(), &'static str> {
    for did in [&output.from_did, &output.to_did].into_iter().flatten() {
        if !is_valid_did_symbol(did) {
            return Err("invalid identity reference");
        }
    }
    match &output.attachment {
        Attachment::Coin | Attachment::None => Ok(()),
        Attachment::AssetIssue(detail) => check_asset_detail(detail, network),
        Attachment::AssetSecondaryIssue(detail) => {
            if !is_valid_asset_symbol(&detail.symbol) {
                return Err("invalid asset symbol");
            }
            if detail.maximum_supply == 0 {
                return Err("secondary issue volume must be positive");
            }
            if !detail.attenuation_model.is_empty() {
                AttenuationModel::parse(&detail.attenuation_model)?;
            }
            Ok(())
        }
        Attachment::AssetTransfer(transfer) => {
            if !is_valid_asset_symbol(&transfer.symbol) {
                return Err("invalid asset symbol");
            }
            if transfer.quantity == 0 {
                return Err("asset transfer quantity must be positive");
            }
            Ok(())
        }
        Attachment::AssetCertIssue(cert)
        | Attachment::AssetCertTransfer(cert)
        | Attachment::AssetCertAutoissue(cert) => check_cert(cert, network),
        Attachment::MitRegister(mit) | Attachment::MitTransfer(mit) => {
            if !is_valid_mit_symbol(&mit.symbol) {
                return Err("invalid token symbol");
            }
            if mit.content.len() > ATTACHMENT_TEXT_MAX_LEN {
                return Err("token content too long");
            }
            if PaymentAddress::parse(&mit.address, network).is_err() {
                return Err("invalid token address");
            }
            Ok(())
        }
        Attachment::DidRegister(did) | Attachment::DidTransfer(did) => {
            if !is_valid_did_symbol(&did.symbol) {
                return Err("invalid identity symbol");
            }
            if PaymentAddress::parse(&did.address, network).is_err() {
                return Err("invalid identity address");
            }
            Ok(())
        }
        Attachment::Message(text) => {
            if text.len() > ATTACHMENT_TEXT_MAX_LEN {
                return Err("message too long");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_charsets() {
        assert!(is_valid_asset_symbol("CAR"));
        assert!(is_valid_asset_symbol("CAR.WHEEL"));
        assert!(!is_valid_asset_symbol("car"));
        assert!(!is_valid_asset_symbol(".CAR"));
        assert!(!is_valid_asset_symbol(&"A".repeat(65)));
        assert!(is_valid_did_symbol("alice@home_1-x"));
        assert!(!is_valid_did_symbol("al"));
        assert!(is_valid_mit_symbol("ticket#42"));
        assert!(!is_valid_mit_symbol("two words"));
    }

    #[test]
    fn secondary_thresholds() {
        assert!(is_valid_secondary_threshold(0));
        assert!(is_valid_secondary_threshold(100));
        assert!(is_valid_secondary_threshold(127));
        assert!(!is_valid_secondary_threshold(101));
        assert!(!secondary_issue_allowed(0, 1_000, 1_000));
        assert!(secondary_issue_allowed(127, 0, 1_000));
        assert!(secondary_issue_allowed(51, 510, 1_000));
        assert!(!secondary_issue_allowed(51, 509, 1_000));
    }

    #[test]
    fn attenuation_models() {
        let fixed = AttenuationModel::parse("PN=0;LH=20;TYPE=1;LQ=9001;LP=60001;UN=3")
            .expect("fixed model");
        assert_eq!(fixed.unlock_number, 3);
        AttenuationModel::parse("TYPE=2;LQ=30;LP=10;UN=2;UC=4,6;UQ=10,20").expect("custom model");
        assert_eq!(
            AttenuationModel::parse("TYPE=2;LQ=30;LP=10;UN=2;UC=4,5;UQ=10,20"),
            Err("custom attenuation model sums do not match LP/LQ")
        );
        assert!(AttenuationModel::parse("TYPE=3;LQ=1;LP=1;UN=1").is_err());
        assert!(AttenuationModel::parse("TYPE=1;LQ=1;LP=1;UN=2").is_err());
        assert!(AttenuationModel::parse("TYPE=1;LQ=1;LP=1;UN=1;XX=2").is_err());
    }
}
