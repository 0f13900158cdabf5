//! Shared class/field schema agreed between client, AI and UberDOG
//!
//! The schema plays the role of the middleware's dc file: it lists every
//! distributed class and the fields each one may carry. Its hash is sent in
//! the client hello, and the Client Agent rejects clients whose hash differs
//! from the cluster's.

/// One distributed class and its fields, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

impl ClassDef {
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains(&field)
    }
}

pub const DISTRIBUTED_GAME: &str = "DistributedGame";
pub const DISTRIBUTED_SHARD_SERVER: &str = "DistributedShardServer";
pub const LOGIN_MANAGER: &str = "LoginManager";

const QUEST_CLASSES: &[ClassDef] = &[
    ClassDef {
        name: DISTRIBUTED_GAME,
        fields: &[],
    },
    ClassDef {
        name: DISTRIBUTED_SHARD_SERVER,
        fields: &["set_name", "set_available"],
    },
    ClassDef {
        name: LOGIN_MANAGER,
        fields: &[
            "login_with_email",
            "login_with_token",
            "authentication_success",
            "authentication_failure",
        ],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    classes: Vec<ClassDef>,
}

impl Schema {
    pub fn new(classes: Vec<ClassDef>) -> Self {
        Self { classes }
    }

    /// The schema every quest process is built against.
    pub fn quest() -> Self {
        Self::new(QUEST_CLASSES.to_vec())
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|class| class.name == name)
    }

    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    /// Stable 32-bit FNV-1a hash over class and field names in order.
    pub fn hash(&self) -> u32 {
        const OFFSET_BASIS: u32 = 0x811C_9DC5;
        const PRIME: u32 = 0x0100_0193;

        let mut hash = OFFSET_BASIS;
        let mut feed = |bytes: &[u8]| {
            for byte in bytes {
                hash ^= *byte as u32;
                hash = hash.wrapping_mul(PRIME);
            }
        };

        for class in &self.classes {
            feed(class.name.as_bytes());
            feed(b"{");
            for field in class.fields {
                feed(field.as_bytes());
                feed(b";");
            }
            feed(b"}");
        }

        hash
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::quest()
    }
}
