//! The controlled vocabulary for interpretation and manifestation URIs.
//!
//! Symbols form a tree: every symbol has at most one parent and the roots are
//! [`INTERPRETATION`] and [`MANIFESTATION`]. Template matching treats a
//! symbol as matching any of its descendants.

/// Root of every interpretation symbol.
pub const INTERPRETATION: &str = "Interpretation";
/// Root of every manifestation symbol.
pub const MANIFESTATION: &str = "Manifestation";

macro_rules! vocabulary {
  ($( $name:ident = $uri:expr ;)*) => {
    $( pub const $name: &str = $uri; )*
  };
}

// ─── zg: event interpretations and manifestations ───────────────────────────

vocabulary! {
  EVENT_INTERPRETATION = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#EventInterpretation";
  ACCEPT_EVENT         = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#AcceptEvent";
  ACCESS_EVENT         = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#AccessEvent";
  CREATE_EVENT         = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#CreateEvent";
  DELETE_EVENT         = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#DeleteEvent";
  DENY_EVENT           = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#DenyEvent";
  EXPIRE_EVENT         = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#ExpireEvent";
  LEAVE_EVENT          = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#LeaveEvent";
  MODIFY_EVENT         = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#ModifyEvent";
  MOVE_EVENT           = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#MoveEvent";
  RECEIVE_EVENT        = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#ReceiveEvent";
  SEND_EVENT           = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#SendEvent";

  EVENT_MANIFESTATION  = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#EventManifestation";
  HEURISTIC_ACTIVITY   = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#HeuristicActivity";
  SCHEDULED_ACTIVITY   = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#ScheduledActivity";
  SYSTEM_NOTIFICATION  = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#SystemNotification";
  USER_ACTIVITY        = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#UserActivity";
  WORLD_ACTIVITY       = "http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#WorldActivity";
}

// ─── nfo / nco / nmo / ncal: subject interpretations ────────────────────────

vocabulary! {
  DOCUMENT                 = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Document";
  TEXT_DOCUMENT            = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#TextDocument";
  PLAIN_TEXT_DOCUMENT      = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#PlainTextDocument";
  PAGINATED_TEXT_DOCUMENT  = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#PaginatedTextDocument";
  SOURCE_CODE              = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#SourceCode";
  SPREADSHEET              = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Spreadsheet";
  PRESENTATION             = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Presentation";
  MEDIA                    = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Media";
  AUDIO                    = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Audio";
  VIDEO                    = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Video";
  IMAGE                    = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Image";
  RASTER_IMAGE             = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#RasterImage";
  VECTOR_IMAGE             = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#VectorImage";
  FOLDER                   = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Folder";
  SOFTWARE                 = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Software";
  WEBSITE                  = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Website";
  BOOKMARK                 = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#Bookmark";

  CONTACT                  = "http://www.semanticdesktop.org/ontologies/2007/03/22/nco#Contact";
  PERSON_CONTACT           = "http://www.semanticdesktop.org/ontologies/2007/03/22/nco#PersonContact";
  ORGANIZATION_CONTACT     = "http://www.semanticdesktop.org/ontologies/2007/03/22/nco#OrganizationContact";
  CONTACT_GROUP            = "http://www.semanticdesktop.org/ontologies/2007/03/22/nco#ContactGroup";
  CONTACT_LIST             = "http://www.semanticdesktop.org/ontologies/2007/03/22/nco#ContactList";

  MESSAGE                  = "http://www.semanticdesktop.org/ontologies/2007/03/22/nmo#Message";
  EMAIL                    = "http://www.semanticdesktop.org/ontologies/2007/03/22/nmo#Email";
  IM_MESSAGE               = "http://www.semanticdesktop.org/ontologies/2007/03/22/nmo#IMMessage";
  MAILBOX                  = "http://www.semanticdesktop.org/ontologies/2007/03/22/nmo#Mailbox";
  MIME_ENTITY              = "http://www.semanticdesktop.org/ontologies/2007/03/22/nmo#MimeEntity";

  CALENDAR_EVENT           = "http://www.semanticdesktop.org/ontologies/2007/04/02/ncal#Event";
  TODO                     = "http://www.semanticdesktop.org/ontologies/2007/04/02/ncal#Todo";
  JOURNAL                  = "http://www.semanticdesktop.org/ontologies/2007/04/02/ncal#Journal";
  ALARM                    = "http://www.semanticdesktop.org/ontologies/2007/04/02/ncal#Alarm";
  CALENDAR                 = "http://www.semanticdesktop.org/ontologies/2007/04/02/ncal#Calendar";
}

// ─── nfo / nco / nmo / ncal: subject manifestations ─────────────────────────

vocabulary! {
  FILE_DATA_OBJECT          = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#FileDataObject";
  EMBEDDED_FILE_DATA_OBJECT = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#EmbeddedFileDataObject";
  ARCHIVE_ITEM              = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#ArchiveItem";
  DELETED_RESOURCE          = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#DeletedResource";
  REMOTE_DATA_OBJECT        = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#RemoteDataObject";
  WEB_DATA_OBJECT           = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#WebDataObject";
  MEDIA_STREAM              = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#MediaStream";
  SOFTWARE_SERVICE          = "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#SoftwareService";
  CONTACT_LIST_DATA_OBJECT  = "http://www.semanticdesktop.org/ontologies/2007/03/22/nco#ContactListDataObject";
  MAILBOX_DATA_OBJECT       = "http://www.semanticdesktop.org/ontologies/2007/03/22/nmo#MailboxDataObject";
  CALENDAR_DATA_OBJECT      = "http://www.semanticdesktop.org/ontologies/2007/04/02/ncal#CalendarDataObject";
}

/// `(symbol, parent)` pairs.
const PARENTS: &[(&str, &str)] = &[
  (EVENT_INTERPRETATION, INTERPRETATION),
  (ACCEPT_EVENT, EVENT_INTERPRETATION),
  (ACCESS_EVENT, EVENT_INTERPRETATION),
  (CREATE_EVENT, EVENT_INTERPRETATION),
  (DELETE_EVENT, EVENT_INTERPRETATION),
  (DENY_EVENT, EVENT_INTERPRETATION),
  (EXPIRE_EVENT, EVENT_INTERPRETATION),
  (LEAVE_EVENT, EVENT_INTERPRETATION),
  (MODIFY_EVENT, EVENT_INTERPRETATION),
  (MOVE_EVENT, EVENT_INTERPRETATION),
  (RECEIVE_EVENT, EVENT_INTERPRETATION),
  (SEND_EVENT, EVENT_INTERPRETATION),
  (EVENT_MANIFESTATION, MANIFESTATION),
  (HEURISTIC_ACTIVITY, EVENT_MANIFESTATION),
  (SCHEDULED_ACTIVITY, EVENT_MANIFESTATION),
  (SYSTEM_NOTIFICATION, EVENT_MANIFESTATION),
  (USER_ACTIVITY, EVENT_MANIFESTATION),
  (WORLD_ACTIVITY, EVENT_MANIFESTATION),
  (DOCUMENT, INTERPRETATION),
  (TEXT_DOCUMENT, DOCUMENT),
  (PLAIN_TEXT_DOCUMENT, TEXT_DOCUMENT),
  (PAGINATED_TEXT_DOCUMENT, TEXT_DOCUMENT),
  (SOURCE_CODE, PLAIN_TEXT_DOCUMENT),
  (SPREADSHEET, DOCUMENT),
  (PRESENTATION, DOCUMENT),
  (MEDIA, INTERPRETATION),
  (AUDIO, MEDIA),
  (VIDEO, MEDIA),
  (IMAGE, MEDIA),
  (RASTER_IMAGE, IMAGE),
  (VECTOR_IMAGE, IMAGE),
  (FOLDER, INTERPRETATION),
  (SOFTWARE, INTERPRETATION),
  (WEBSITE, INTERPRETATION),
  (BOOKMARK, INTERPRETATION),
  (CONTACT, INTERPRETATION),
  (PERSON_CONTACT, CONTACT),
  (ORGANIZATION_CONTACT, CONTACT),
  (CONTACT_GROUP, INTERPRETATION),
  (CONTACT_LIST, INTERPRETATION),
  (MESSAGE, INTERPRETATION),
  (EMAIL, MESSAGE),
  (IM_MESSAGE, MESSAGE),
  (MAILBOX, INTERPRETATION),
  (MIME_ENTITY, INTERPRETATION),
  (CALENDAR_EVENT, INTERPRETATION),
  (TODO, INTERPRETATION),
  (JOURNAL, INTERPRETATION),
  (ALARM, INTERPRETATION),
  (CALENDAR, INTERPRETATION),
  (FILE_DATA_OBJECT, MANIFESTATION),
  (EMBEDDED_FILE_DATA_OBJECT, FILE_DATA_OBJECT),
  (ARCHIVE_ITEM, EMBEDDED_FILE_DATA_OBJECT),
  (DELETED_RESOURCE, FILE_DATA_OBJECT),
  (REMOTE_DATA_OBJECT, MANIFESTATION),
  (WEB_DATA_OBJECT, MANIFESTATION),
  (MEDIA_STREAM, MANIFESTATION),
  (SOFTWARE_SERVICE, MANIFESTATION),
  (CONTACT_LIST_DATA_OBJECT, MANIFESTATION),
  (MAILBOX_DATA_OBJECT, MANIFESTATION),
  (CALENDAR_DATA_OBJECT, MANIFESTATION),
];

/// The parent of a known symbol. Unknown URIs have no parent.
pub fn parent_of(uri: &str) -> Option<&'static str> {
  PARENTS
    .iter()
    .find(|(child, _)| *child == uri)
    .map(|(_, parent)| *parent)
}

/// True when `uri` is `ancestor` or one of its descendants.
pub fn is_a(uri: &str, ancestor: &str) -> bool {
  if uri == ancestor {
    return true;
  }
  let mut current = parent_of(uri);
  while let Some(symbol) = current {
    if symbol == ancestor {
      return true;
    }
    current = parent_of(symbol);
  }
  false
}
