use anyhow::{anyhow, bail, Context, Result};

/// Fallback service name for ports missing from the well-known table.
pub const UNKNOWN_SERVICE: &str = "Unknown";

/// Well-known TCP services, sorted by port. Names follow the IANA / `/etc/services` spelling.
const WELL_KNOWN_SERVICES: &[(u16, &str)] = &[
    (7, "echo"),
    (9, "discard"),
    (13, "daytime"),
    (19, "chargen"),
    (20, "ftp-data"),
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (37, "time"),
    (43, "whois"),
    (49, "tacacs"),
    (53, "domain"),
    (67, "bootps"),
    (68, "bootpc"),
    (69, "tftp"),
    (70, "gopher"),
    (79, "finger"),
    (80, "http"),
    (88, "kerberos"),
    (102, "iso-tsap"),
    (110, "pop3"),
    (111, "sunrpc"),
    (113, "auth"),
    (119, "nntp"),
    (123, "ntp"),
    (135, "epmap"),
    (137, "netbios-ns"),
    (138, "netbios-dgm"),
    (139, "netbios-ssn"),
    (143, "imap2"),
    (161, "snmp"),
    (162, "snmp-trap"),
    (179, "bgp"),
    (194, "irc"),
    (389, "ldap"),
    (427, "svrloc"),
    (443, "https"),
    (444, "snpp"),
    (445, "microsoft-ds"),
    (464, "kpasswd"),
    (465, "submissions"),
    (487, "saft"),
    (500, "isakmp"),
    (512, "exec"),
    (513, "login"),
    (514, "shell"),
    (515, "printer"),
    (538, "gdomap"),
    (543, "klogin"),
    (544, "kshell"),
    (548, "afpovertcp"),
    (554, "rtsp"),
    (563, "nntps"),
    (587, "submission"),
    (631, "ipp"),
    (636, "ldaps"),
    (646, "ldp"),
    (873, "rsync"),
    (989, "ftps-data"),
    (990, "ftps"),
    (992, "telnets"),
    (993, "imaps"),
    (995, "pop3s"),
    (1080, "socks"),
    (1194, "openvpn"),
    (1433, "ms-sql-s"),
    (1434, "ms-sql-m"),
    (1521, "ncube-lm"),
    (1701, "l2f"),
    (1723, "pptp"),
    (1812, "radius"),
    (1813, "radius-acct"),
    (1883, "mqtt"),
    (2049, "nfs"),
    (2375, "docker"),
    (2376, "docker-s"),
    (2379, "etcd-client"),
    (2380, "etcd-server"),
    (3128, "squid-http"),
    (3260, "iscsi-target"),
    (3306, "mysql"),
    (3389, "ms-wbt-server"),
    (3690, "svn"),
    (4369, "epmd"),
    (5000, "upnp"),
    (5060, "sip"),
    (5061, "sip-tls"),
    (5222, "xmpp-client"),
    (5269, "xmpp-server"),
    (5353, "mdns"),
    (5432, "postgresql"),
    (5672, "amqp"),
    (5900, "rfb"),
    (5984, "couchdb"),
    (5985, "wsman"),
    (5986, "wsmans"),
    (6000, "x11"),
    (6379, "redis"),
    (6443, "sun-sr-https"),
    (6667, "ircd"),
    (8000, "irdmi"),
    (8008, "http-alt"),
    (8080, "http-alt"),
    (8081, "sunproxyadmin"),
    (8443, "pcsync-https"),
    (8888, "ddi-tcp-1"),
    (9000, "cslistener"),
    (9090, "websm"),
    (9092, "XmlIpcRegSvc"),
    (9100, "jetdirect"),
    (9200, "wap-wsp"),
    (9418, "git"),
    (10000, "webmin"),
    (11211, "memcache"),
    (27017, "mongodb"),
];

/// Look up the well-known service name for a TCP port.
pub fn service_name(port: u16) -> Option<&'static str> {
    WELL_KNOWN_SERVICES
        .binary_search_by_key(&port, |&(p, _)| p)
        .ok()
        .map(|idx| WELL_KNOWN_SERVICES[idx].1)
}

/// Service name for a port, or [`UNKNOWN_SERVICE`] when the table has no entry.
pub fn service_name_or_unknown(port: u16) -> &'static str {
    service_name(port).unwrap_or(UNKNOWN_SERVICE)
}

/// Parse a port range argument into `(start, end)`.
///
/// Accepted forms:
/// - single port: `80` (start == end)
/// - inclusive range: `1-1024`
///
/// The order of the two bounds is not checked here; the controller rejects
/// inverted ranges.
pub fn parse_port_range(s: &str) -> Result<(u16, u16)> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty port range");
    }
    if let Some((a, b)) = s.split_once('-') {
        let start = parse_port_str(a.trim())
            .with_context(|| format!("invalid start in range: {a}"))?;
        let end = parse_port_str(b.trim())
            .with_context(|| format!("invalid end in range: {b}"))?;
        return Ok((start, end));
    }
    let p = parse_port_str(s).with_context(|| format!("invalid port value: {s}"))?;
    Ok((p, p))
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
