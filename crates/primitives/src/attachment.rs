//! Typed payloads carried by transaction outputs beyond their coin value.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

/// Returns the part of a dotted symbol before its first `.`.
pub fn domain_of(symbol: &str) -> &str {
    symbol.split('.').next().unwrap_or(symbol)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum CertType {
    Issue,
    Domain,
    Naming,
    Mining,
    Witness,
}

impl CertType {
    pub const ALL: [CertType; 5] = [
        CertType::Issue,
        CertType::Domain,
        CertType::Naming,
        CertType::Mining,
        CertType::Witness,
    ];

    pub fn code(self) -> u32 {
        match self {
            CertType::Issue => 1,
            CertType::Domain => 2,
            CertType::Naming => 3,
            CertType::Mining => 4,
            CertType::Witness => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        CertType::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CertType::Issue => "issue",
            CertType::Domain => "domain",
            CertType::Naming => "naming",
            CertType::Mining => "mining",
            CertType::Witness => "witness",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AssetDetail {
    pub symbol: String,
    /// Total supply for an issue; the newly minted volume for a secondary issue.
    pub maximum_supply: u64,
    pub decimal_number: u8,
    pub secondary_issue_threshold: u8,
    pub issuer: String,
    pub address: String,
    pub description: String,
    /// Vesting parameters (`KEY=VALUE;...`), empty when unrestricted.
    pub attenuation_model: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AssetTransfer {
    pub symbol: String,
    pub quantity: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetCert {
    pub symbol: String,
    /// Identity symbol of the holder.
    pub owner: String,
    pub address: String,
    pub cert_type: CertType,
    pub content: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Mit {
    pub symbol: String,
    pub address: String,
    pub content: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Did {
    pub symbol: String,
    pub address: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AttachmentKind {
    Coin,
    AssetIssue,
    AssetSecondaryIssue,
    AssetTransfer,
    AssetCertIssue,
    AssetCertTransfer,
    AssetCertAutoissue,
    MitRegister,
    MitTransfer,
    DidRegister,
    DidTransfer,
    Message,
    None,
}

impl AttachmentKind {
    fn tag(self) -> u32 {
        match self {
            AttachmentKind::Coin => 0x00,
            AttachmentKind::Message => 0x03,
            AttachmentKind::AssetIssue => 0x20,
            AttachmentKind::AssetSecondaryIssue => 0x21,
            AttachmentKind::AssetTransfer => 0x22,
            AttachmentKind::DidRegister => 0x40,
            AttachmentKind::DidTransfer => 0x41,
            AttachmentKind::AssetCertIssue => 0x50,
            AttachmentKind::AssetCertTransfer => 0x51,
            AttachmentKind::AssetCertAutoissue => 0x52,
            AttachmentKind::MitRegister => 0x60,
            AttachmentKind::MitTransfer => 0x61,
            AttachmentKind::None => 0xff,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Attachment {
    #[default]
    Coin,
    AssetIssue(AssetDetail),
    AssetSecondaryIssue(AssetDetail),
    AssetTransfer(AssetTransfer),
    AssetCertIssue(AssetCert),
    AssetCertTransfer(AssetCert),
    AssetCertAutoissue(AssetCert),
    MitRegister(Mit),
    MitTransfer(Mit),
    DidRegister(Did),
    DidTransfer(Did),
    Message(String),
    None,
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Attachment::Coin => AttachmentKind::Coin,
            Attachment::AssetIssue(_) => AttachmentKind::AssetIssue,
            Attachment::AssetSecondaryIssue(_) => AttachmentKind::AssetSecondaryIssue,
            Attachment::AssetTransfer(_) => AttachmentKind::AssetTransfer,
            Attachment::AssetCertIssue(_) => AttachmentKind::AssetCertIssue,
            Attachment::AssetCertTransfer(_) => AttachmentKind::AssetCertTransfer,
            Attachment::AssetCertAutoissue(_) => AttachmentKind::AssetCertAutoissue,
            Attachment::MitRegister(_) => AttachmentKind::MitRegister,
            Attachment::MitTransfer(_) => AttachmentKind::MitTransfer,
            Attachment::DidRegister(_) => AttachmentKind::DidRegister,
            Attachment::DidTransfer(_) => AttachmentKind::DidTransfer,
            Attachment::Message(_) => AttachmentKind::Message,
            Attachment::None => AttachmentKind::None,
        }
    }

    /// Symbol of the fungible asset this output carries, if any.
    pub fn asset_symbol(&self) -> Option<&str> {
        match self {
            Attachment::AssetIssue(detail) | Attachment::AssetSecondaryIssue(detail) => {
                Some(&detail.symbol)
            }
            Attachment::AssetTransfer(transfer) => Some(&transfer.symbol),
            _ => None,
        }
    }

    pub fn asset_amount(&self) -> u64 {
        match self {
            Attachment::AssetIssue(detail) | Attachment::AssetSecondaryIssue(detail) => {
                detail.maximum_supply
            }
            Attachment::AssetTransfer(transfer) => transfer.quantity,
            _ => 0,
        }
    }

    pub fn cert(&self) -> Option<&AssetCert> {
        match self {
            Attachment::AssetCertIssue(cert)
            | Attachment::AssetCertTransfer(cert)
            | Attachment::AssetCertAutoissue(cert) => Some(cert),
            _ => None,
        }
    }

    pub fn mit(&self) -> Option<&Mit> {
        match self {
            Attachment::MitRegister(mit) | Attachment::MitTransfer(mit) => Some(mit),
            _ => None,
        }
    }

    pub fn did(&self) -> Option<&Did> {
        match self {
            Attachment::DidRegister(did) | Attachment::DidTransfer(did) => Some(did),
            _ => None,
        }
    }

    /// Attachments that only exist once the Nova feature set is active.
    pub fn requires_nova(&self) -> bool {
        self.cert().is_some() || self.mit().is_some() || self.did().is_some()
    }
}

impl Encodable for AssetDetail {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_str(&self.symbol);
        encoder.write_u64_le(self.maximum_supply);
        encoder.write_u8(self.decimal_number);
        encoder.write_u8(self.secondary_issue_threshold);
        encoder.write_var_str(&self.issuer);
        encoder.write_var_str(&self.address);
        encoder.write_var_str(&self.description);
        encoder.write_var_str(&self.attenuation_model);
    }
}

impl Decodable for AssetDetail {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            symbol: decoder.read_var_str()?,
            maximum_supply: decoder.read_u64_le()?,
            decimal_number: decoder.read_u8()?,
            secondary_issue_threshold: decoder.read_u8()?,
            issuer: decoder.read_var_str()?,
            address: decoder.read_var_str()?,
            description: decoder.read_var_str()?,
            attenuation_model: decoder.read_var_str()?,
        })
    }
}

impl Encodable for AssetCert {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_str(&self.symbol);
        encoder.write_var_str(&self.owner);
        encoder.write_var_str(&self.address);
        encoder.write_u32_le(self.cert_type.code());
        encoder.write_var_str(&self.content);
    }
}

impl Decodable for AssetCert {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let symbol = decoder.read_var_str()?;
        let owner = decoder.read_var_str()?;
        let address = decoder.read_var_str()?;
        let cert_type = CertType::from_code(decoder.read_u32_le()?)
            .ok_or(DecodeError::Invalid("unknown certificate type"))?;
        let content = decoder.read_var_str()?;
        Ok(Self {
            symbol,
            owner,
            address,
            cert_type,
            content,
        })
    }
}

impl Encodable for Mit {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_str(&self.symbol);
        encoder.write_var_str(&self.address);
        encoder.write_var_str(&self.content);
    }
}

impl Decodable for Mit {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            symbol: decoder.read_var_str()?,
            address: decoder.read_var_str()?,
            content: decoder.read_var_str()?,
        })
    }
}

impl Encodable for Did {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_str(&self.symbol);
        encoder.write_var_str(&self.address);
    }
}

impl Decodable for Did {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            symbol: decoder.read_var_str()?,
            address: decoder.read_var_str()?,
        })
    }
}

impl Encodable for Attachment {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.kind().tag());
        match self {
            Attachment::Coin | Attachment::None => {}
            Attachment::AssetIssue(detail) | Attachment::AssetSecondaryIssue(detail) => {
                detail.consensus_encode(encoder)
            }
            Attachment::AssetTransfer(transfer) => {
                encoder.write_var_str(&transfer.symbol);
                encoder.write_u64_le(transfer.quantity);
            }
            Attachment::AssetCertIssue(cert)
            | Attachment::AssetCertTransfer(cert)
            | Attachment::AssetCertAutoissue(cert) => cert.consensus_encode(encoder),
            Attachment::MitRegister(mit) | Attachment::MitTransfer(mit) => {
                mit.consensus_encode(encoder)
            }
            Attachment::DidRegister(did) | Attachment::DidTransfer(did) => {
                did.consensus_encode(encoder)
            }
            Attachment::Message(text) => encoder.write_var_str(text),
        }
    }
}

impl Decodable for Attachment {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let tag = decoder.read_u32_le()?;
        let attachment = match tag {
            0x00 => Attachment::Coin,
            0x03 => Attachment::Message(decoder.read_var_str()?),
            0x20 => Attachment::AssetIssue(AssetDetail::consensus_decode(decoder)?),
            0x21 => Attachment::AssetSecondaryIssue(AssetDetail::consensus_decode(decoder)?),
            0x22 => Attachment::AssetTransfer(AssetTransfer {
                symbol: decoder.read_var_str()?,
                quantity: decoder.read_u64_le()?,
            }),
            0x40 => Attachment::DidRegister(Did::consensus_decode(decoder)?),
            0x41 => Attachment::DidTransfer(Did::consensus_decode(decoder)?),
            0x50 => Attachment::AssetCertIssue(AssetCert::consensus_decode(decoder)?),
            0x51 => Attachment::AssetCertTransfer(AssetCert::consensus_decode(decoder)?),
            0x52 => Attachment::AssetCertAutoissue(AssetCert::consensus_decode(decoder)?),
            0x60 => Attachment::MitRegister(Mit::consensus_decode(decoder)?),
            0x61 => Attachment::MitTransfer(Mit::consensus_decode(decoder)?),
            0xff => Attachment::None,
            _ => return Err(DecodeError::Invalid("unknown attachment type")),
        };
        Ok(attachment)
    }
}
