//! Hickory DNS authority answering A/AAAA from the record cache.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::metrics::{self, QueryResult, Timer};
use crate::state::RecordCache;

/// Authority for one configured domain, backed by the shared record cache.
///
/// Anything the table cannot answer (unknown name, missing address family,
/// other record types) is skipped so the next handler in the chain gets it.
pub struct TailnetAuthority {
    origin: LowerName,
    cache: RecordCache,
    ttl: u32,
}

impl TailnetAuthority {
    /// Create an authority for `domain`.
    pub fn new(domain: &str, ttl: u32, cache: RecordCache) -> Result<Self, hickory_proto::ProtoError> {
        let mut origin = Name::from_ascii(domain)?;
        origin.set_fqdn(true);

        Ok(Self {
            origin: origin.into(),
            cache,
            ttl,
        })
    }

    fn build_record_set(&self, name: Name, rdata: RData) -> RecordSet {
        let rtype = rdata.record_type();
        let mut record_set = RecordSet::new(name.clone(), rtype, 0);
        let mut record = Record::from_rdata(name, self.ttl, rdata);
        record.set_dns_class(hickory_proto::rr::DNSClass::IN);
        record_set.insert(record, 0);
        record_set
    }
}

#[async_trait]
impl Authority for TailnetAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let timer = Timer::start();
        let rtype_str = format!("{:?}", rtype);

        if !self.origin.zone_of(name) {
            trace!(name = %name, origin = %self.origin, "name outside zone");
            metrics::record_query(&rtype_str, QueryResult::Deferred, timer.elapsed());
            return LookupControlFlow::Skip;
        }

        let mut fqdn = name.to_string().to_ascii_lowercase();
        if !fqdn.ends_with('.') {
            fqdn.push('.');
        }

        let Some(record) = self.cache.lookup(&fqdn) else {
            debug!(name = %fqdn, rtype = ?rtype, "no record, deferring");
            metrics::record_query(&rtype_str, QueryResult::Deferred, timer.elapsed());
            return LookupControlFlow::Skip;
        };

        let rdata = match rtype {
            RecordType::A => record.ipv4.map(|ip| RData::A(A::from(ip))),
            RecordType::AAAA => record.ipv6.map(|ip| RData::AAAA(AAAA::from(ip))),
            _ => None,
        };

        match rdata {
            Some(rdata) => {
                debug!(name = %fqdn, rtype = ?rtype, "answering from record table");
                metrics::record_query(&rtype_str, QueryResult::Answered, timer.elapsed());
                let record_set = Arc::new(self.build_record_set(Name::from(name.clone()), rdata));
                LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)))
            }
            None => {
                debug!(name = %fqdn, rtype = ?rtype, "address family not available, deferring");
                metrics::record_query(&rtype_str, QueryResult::Deferred, timer.elapsed());
                LookupControlFlow::Skip
            }
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        self.lookup(
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates not supported
        Err(ResponseCode::NotImp)
    }
}
