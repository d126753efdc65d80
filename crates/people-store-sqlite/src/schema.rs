//! SQL schema for the people SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS organizations (
    organization_id TEXT PRIMARY KEY,
    type            TEXT NOT NULL DEFAULT 'organization',
    names           TEXT NOT NULL DEFAULT '{}',   -- JSON: lang -> name
    acronym         TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS organization_identifiers (
    organization_id TEXT NOT NULL
                    REFERENCES organizations(organization_id) ON DELETE CASCADE,
    namespace       TEXT NOT NULL,
    value           TEXT NOT NULL,
    PRIMARY KEY (organization_id, namespace, value)
);

-- Time-bounded parent edges; valid_until NULL is open-ended.
CREATE TABLE IF NOT EXISTS organization_parents (
    organization_id TEXT NOT NULL
                    REFERENCES organizations(organization_id) ON DELETE CASCADE,
    parent_id       TEXT NOT NULL
                    REFERENCES organizations(organization_id) ON DELETE CASCADE,
    valid_from      TEXT NOT NULL,
    valid_until     TEXT,
    PRIMARY KEY (organization_id, parent_id, valid_from)
);

CREATE TABLE IF NOT EXISTS people (
    person_id             TEXT PRIMARY KEY,
    active                INTEGER NOT NULL DEFAULT 0,
    name                  TEXT,
    given_name            TEXT,
    family_name           TEXT,
    preferred_name        TEXT,
    preferred_given_name  TEXT,
    preferred_family_name TEXT,
    honorific_prefix      TEXT,
    email                 TEXT,
    birth_date            TEXT,            -- YYYY-MM-DD
    expiration_date       TEXT,            -- YYYY-MM-DD
    job_categories        TEXT NOT NULL DEFAULT '[]',
    roles                 TEXT NOT NULL DEFAULT '[]',
    object_classes        TEXT NOT NULL DEFAULT '[]',
    attributes            TEXT NOT NULL DEFAULT '[]',
    settings              TEXT NOT NULL DEFAULT '{}',
    secrets               TEXT NOT NULL DEFAULT '{}',   -- namespace -> sealed
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL
);

-- (namespace, value) is not unique across people; duplicates are folded
-- together by a later merge pass.
CREATE TABLE IF NOT EXISTS person_identifiers (
    person_id TEXT NOT NULL REFERENCES people(person_id) ON DELETE CASCADE,
    namespace TEXT NOT NULL,
    value     TEXT NOT NULL,
    PRIMARY KEY (person_id, namespace, value)
);

CREATE TABLE IF NOT EXISTS person_organizations (
    person_id       TEXT NOT NULL
                    REFERENCES people(person_id) ON DELETE CASCADE,
    organization_id TEXT NOT NULL
                    REFERENCES organizations(organization_id) ON DELETE CASCADE,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (person_id, organization_id)
);

CREATE INDEX IF NOT EXISTS person_identifiers_key_idx
    ON person_identifiers(namespace, value);
CREATE INDEX IF NOT EXISTS organization_identifiers_key_idx
    ON organization_identifiers(namespace, value);
CREATE INDEX IF NOT EXISTS people_active_idx ON people(active);

PRAGMA user_version = 1;
";
